mod channel;
mod tls;

pub use channel::ReliableChannel;
pub use tls::complete_handshake;
