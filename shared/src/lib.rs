//! # Tandem Shared
//! Message model, encrypted reliable & datagram channels and the hybrid controller shared
//! between tandem-server & tandem-client.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod channel;
mod config;
pub mod crypto;
pub mod datagram;
mod error;
mod hybrid;
pub mod message;
pub mod reliable;
mod throttle;
mod timestamp;

pub use channel::{MessageChannel, PROTOCOL_HYBRID, PROTOCOL_TCP, PROTOCOL_UDP};
pub use config::{ConnectionConfig, DEFAULT_PORT};
pub use datagram::{DatagramChannel, DatagramSocket, DatagramStats, MAX_DATAGRAM_BYTES};
pub use error::{ChannelError, CodecError, CryptoError, HandshakeError};
pub use hybrid::{
    Delivery, HybridController, HybridState, Inspection, Passive, RoutingPolicy, SwitchRole,
    WeakHybridController,
};
pub use message::{Envelope, GameSnapshot, Message, MessageBuilder, MessageType};
pub use reliable::{complete_handshake, ReliableChannel};
pub use throttle::{Throttle, ThrottleConfig, Verdict};
pub use timestamp::{TimeError, Timestamp};

pub use rustls;
