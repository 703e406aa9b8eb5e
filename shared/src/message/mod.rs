pub mod codec;

mod envelope;
mod message;
mod message_type;

pub use envelope::Envelope;
pub use message::{GameSnapshot, Message, MessageBuilder};
pub use message_type::MessageType;
