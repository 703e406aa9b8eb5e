use crate::{error::ChannelError, message::Message};

pub const PROTOCOL_TCP: &str = "tcp";
pub const PROTOCOL_UDP: &str = "udp";
pub const PROTOCOL_HYBRID: &str = "tcp+udp";

/// The contract every transport exposes to the game layer.
///
/// Implemented by [`ReliableChannel`](crate::ReliableChannel),
/// [`DatagramChannel`](crate::DatagramChannel) and [`HybridController`](crate::HybridController).
/// All operations take `&self` and may be called from any thread.
pub trait MessageChannel: Send + Sync {
    /// Sends one message. Concurrent callers are serialized internally.
    fn send(&self, message: &Message) -> Result<(), ChannelError>;

    /// Blocks until a message arrives or the channel is closed for good.
    ///
    /// Keep-alives and undecodable frames never reach the caller. Once the channel is gone every
    /// call fails with [`ChannelError::ConnectionLost`].
    fn receive(&self) -> Result<Message, ChannelError>;

    /// Idempotent; unblocks any thread parked in `receive()`
    fn close(&self);

    /// Label of the active transport, for diagnostics only
    fn protocol_name(&self) -> &'static str;
}
