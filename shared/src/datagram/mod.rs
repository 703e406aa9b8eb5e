mod channel;
pub mod handshake;
mod replay;
mod socket;
mod stats;

pub use channel::{DatagramChannel, MAX_DATAGRAM_BYTES};
pub use replay::ReplayWindow;
pub use socket::DatagramSocket;
pub use stats::DatagramStats;
