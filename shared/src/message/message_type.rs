use serde::{Deserialize, Serialize};

/// Identifies what a [`Message`](super::Message) carries.
///
/// Codes below [`MessageType::FIRST_GAME_CODE`] are reserved for the transport core. Every other
/// code belongs to the game layer and is opaque to the channels. Codes are stable across
/// releases: never renumber a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum MessageType {
    /// Zero-payload heartbeat, filtered out by every channel's `receive()`
    KeepAlive,
    /// Initiator asks to upgrade the session to hybrid transport
    ProtocolSwitch,
    /// Responder hands out the one-time credential for this negotiation
    ProtocolSwitchResponse,
    /// Initiator presents the credential over the datagram channel
    ProtocolSwitchFind,
    /// Responder confirms the datagram channel is bound to the session
    ProtocolSwitchDone,
    /// The peer is sending a message type faster than it is allowed to
    MessageTooFrequent,
    /// Any code owned by the game layer
    Game(u16),
}

impl MessageType {
    pub const FIRST_GAME_CODE: u16 = 64;

    /// Routine unit position update, droppable by default
    pub const POSITION_UPDATE: MessageType = MessageType::Game(64);
    /// Camera / viewport movement, droppable by default
    pub const VIEWPORT_UPDATE: MessageType = MessageType::Game(65);
    /// Cursor hover broadcast, droppable by default
    pub const CURSOR_UPDATE: MessageType = MessageType::Game(66);

    pub fn code(&self) -> u16 {
        match self {
            MessageType::KeepAlive => 0,
            MessageType::ProtocolSwitch => 1,
            MessageType::ProtocolSwitchResponse => 2,
            MessageType::ProtocolSwitchFind => 3,
            MessageType::ProtocolSwitchDone => 4,
            MessageType::MessageTooFrequent => 5,
            MessageType::Game(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => MessageType::KeepAlive,
            1 => MessageType::ProtocolSwitch,
            2 => MessageType::ProtocolSwitchResponse,
            3 => MessageType::ProtocolSwitchFind,
            4 => MessageType::ProtocolSwitchDone,
            5 => MessageType::MessageTooFrequent,
            other => MessageType::Game(other),
        }
    }

    /// Whether this type drives the transport itself rather than the game
    pub fn is_control(&self) -> bool {
        self.code() < Self::FIRST_GAME_CODE
    }

    /// Whether this type belongs to the protocol-switch negotiation
    pub fn is_switch_control(&self) -> bool {
        matches!(
            self,
            MessageType::ProtocolSwitch
                | MessageType::ProtocolSwitchResponse
                | MessageType::ProtocolSwitchFind
                | MessageType::ProtocolSwitchDone
        )
    }
}

impl From<u16> for MessageType {
    fn from(code: u16) -> Self {
        MessageType::from_code(code)
    }
}

impl From<MessageType> for u16 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}
