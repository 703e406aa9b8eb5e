use thiserror::Error;

use crate::message::MessageType;

/// Errors that can occur while encoding or decoding a record on the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The record was written by a peer speaking a different format version
    #[error("Unsupported record format version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    /// The record is shorter than its mandatory header
    #[error("Record of {len} bytes is too short to contain a header")]
    Truncated { len: usize },

    /// The record body could not be decoded (SECURITY: potentially malicious frame)
    #[error("Record body could not be decoded: {reason}")]
    InvalidBody { reason: String },

    /// The record could not be serialized
    #[error("Record could not be serialized: {reason}")]
    SerializeFailed { reason: String },

    /// A frame header announced more bytes than any valid frame may carry
    #[error("Frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
}

/// Errors raised by the symmetric and asymmetric primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The system random number generator failed
    #[error("Secure random number generator failed")]
    RandomFailed,

    /// Key derivation failed
    #[error("Key derivation failed")]
    KeyDerivationFailed,

    /// Key agreement with the peer's public key failed
    #[error("Key agreement failed; the peer public key is invalid")]
    KeyAgreementFailed,

    /// A sealed packet was shorter than the IV and tag it must carry
    #[error("Sealed packet of {len} bytes is too short (minimum {min} bytes)")]
    PacketTooShort { len: usize, min: usize },

    /// Decryption failed or the authentication tag did not match
    #[error("Packet failed authentication")]
    AuthenticationFailed,

    /// A private key could not be parsed
    #[error("Private key is not a supported PKCS#8 ECDSA P-256 key")]
    InvalidPrivateKey,

    /// Signing failed
    #[error("Signing failed")]
    SigningFailed,

    /// A signature did not verify against the pinned certificate
    #[error("Signature does not match the pinned certificate")]
    SignatureMismatch,

    /// The pinned certificate could not be parsed
    #[error("Pinned certificate could not be parsed")]
    InvalidCertificate,
}

/// Errors that abort a protocol-switch negotiation or a certificate handshake.
/// The session itself continues on the reliable channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// A message arrived that is not valid at this point of the negotiation
    #[error("Expected {expected:?} during negotiation but received {received:?}")]
    UnexpectedMessage {
        expected: MessageType,
        received: MessageType,
    },

    /// A switch response did not carry a request id and token
    #[error("Protocol switch response is missing its credential")]
    MissingCredential,

    /// The datagram key offer was not signed by the reliable channel's peer
    #[error("Datagram key offer is not signed by the reliable channel's certificate")]
    KeySubstitution,

    /// The peer did not answer within the allotted time
    #[error("Negotiation step '{stage}' timed out")]
    Timeout { stage: &'static str },

    /// The peer's certificate failed chain validation
    #[error("Peer certificate was not accepted: {reason}")]
    UntrustedCertificate { reason: String },

    /// The TLS handshake failed for a reason other than certificate validation
    #[error("TLS handshake failed: {reason}")]
    Tls { reason: String },
}

/// The error taxonomy exposed by every [`MessageChannel`](crate::MessageChannel)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The underlying socket refused the write
    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    /// A frame could not be decoded. Recovered locally, never surfaced by `receive()`
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] CodecError),

    /// The reliable channel is gone; fatal for the whole session
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The datagram channel is absent or has failed; never fatal
    #[error("Datagram channel unavailable: {reason}")]
    DatagramUnavailable { reason: String },

    /// Trust negotiation failed or was declined
    #[error("Connection rejected: {reason}")]
    ConnectionRejected { reason: String },

    /// The protocol-switch negotiation or certificate handshake was violated
    #[error("Handshake protocol error: {0}")]
    HandshakeProtocol(#[from] HandshakeError),
}

impl ChannelError {
    pub fn lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn datagram_unavailable(reason: impl Into<String>) -> Self {
        Self::DatagramUnavailable {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::ConnectionRejected {
            reason: reason.into(),
        }
    }

    /// Whether this error ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

impl From<CryptoError> for ChannelError {
    fn from(err: CryptoError) -> Self {
        Self::DatagramUnavailable {
            reason: err.to_string(),
        }
    }
}
