use serde::{Deserialize, Serialize};

use super::{codec, Message};
use crate::error::CodecError;

/// Sequence-numbered wrapper applied to a [`Message`] for datagram transport only.
/// Never exposed to the consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sequence: u64,
    /// Milliseconds since UNIX epoch at the sender
    pub sent_at: u64,
    pub is_ack: bool,
    pub ack_sequence: u64,
    pub message: Message,
}

impl Envelope {
    pub fn new(sequence: u64, sent_at: u64, message: Message) -> Self {
        Self {
            sequence,
            sent_at,
            is_ack: false,
            ack_sequence: 0,
            message,
        }
    }

    pub fn ack(sequence: u64, sent_at: u64, ack_sequence: u64, message: Message) -> Self {
        Self {
            sequence,
            sent_at,
            is_ack: true,
            ack_sequence,
            message,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode_record(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode_record(bytes)
    }
}
