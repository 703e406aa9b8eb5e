use serde::{Deserialize, Serialize};

use super::MessageType;

/// Opaque game-state payload embedded in a [`Message`] (lobby state, world snapshot, ...).
/// The transport never looks inside.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    bytes: Vec<u8>,
}

impl GameSnapshot {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// The application-level unit of communication between client and server.
///
/// Immutable once built; use [`Message::builder`] to attach optional fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    kind: MessageType,
    ints: Option<Vec<i32>>,
    strings: Option<Vec<String>>,
    doubles: Option<Vec<f64>>,
    snapshot: Option<GameSnapshot>,
}

impl Message {
    /// A message carrying nothing but its type
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            ints: None,
            strings: None,
            doubles: None,
            snapshot: None,
        }
    }

    pub fn builder(kind: MessageType) -> MessageBuilder {
        MessageBuilder {
            message: Message::new(kind),
        }
    }

    pub fn keep_alive() -> Self {
        Self::new(MessageType::KeepAlive)
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn ints(&self) -> Option<&[i32]> {
        self.ints.as_deref()
    }

    pub fn strings(&self) -> Option<&[String]> {
        self.strings.as_deref()
    }

    pub fn doubles(&self) -> Option<&[f64]> {
        self.doubles.as_deref()
    }

    pub fn snapshot(&self) -> Option<&GameSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_keep_alive(&self) -> bool {
        self.kind == MessageType::KeepAlive
    }
}

pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn ints(mut self, ints: Vec<i32>) -> Self {
        self.message.ints = Some(ints);
        self
    }

    pub fn strings(mut self, strings: Vec<String>) -> Self {
        self.message.strings = Some(strings);
        self
    }

    pub fn doubles(mut self, doubles: Vec<f64>) -> Self {
        self.message.doubles = Some(doubles);
        self
    }

    pub fn snapshot(mut self, snapshot: GameSnapshot) -> Self {
        self.message.snapshot = Some(snapshot);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}
