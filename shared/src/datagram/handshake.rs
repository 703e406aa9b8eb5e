//! Plaintext datagrams of the key establishment that precedes a datagram channel.
//!
//! ```text
//! client                                   server
//!   KeyRequest { nonce }            ->
//!                                   <-     KeyOffer { nonce, server_public, signature }
//!   KeyExchange { nonce, client_public, wrapped_key } ->
//!                                   <-     sealed ack envelope (is_ack, ack_sequence 0)
//! ```
//!
//! The offer is signed with the private key behind the server's TLS certificate, so a client
//! that pinned that certificate on the reliable channel can detect a substituted key.

use serde::{Deserialize, Serialize};

use crate::{
    crypto::PUBLIC_KEY_BYTES,
    error::CodecError,
    message::codec,
};

pub const HANDSHAKE_MAGIC: [u8; 4] = *b"TDMK";
pub const NONCE_BYTES: usize = 16;

const OFFER_CONTEXT: &[u8] = b"tandem datagram key offer v1";
const WRAP_CONTEXT: &[u8] = b"tandem datagram key wrap v1";

pub type Nonce = [u8; NONCE_BYTES];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakePacket {
    KeyRequest {
        nonce: Nonce,
    },
    KeyOffer {
        nonce: Nonce,
        server_public: [u8; PUBLIC_KEY_BYTES],
        signature: Vec<u8>,
    },
    KeyExchange {
        nonce: Nonce,
        client_public: [u8; PUBLIC_KEY_BYTES],
        wrapped_key: Vec<u8>,
    },
}

impl HandshakePacket {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let record = codec::encode_record(self)?;
        let mut out = Vec::with_capacity(HANDSHAKE_MAGIC.len() + record.len());
        out.extend_from_slice(&HANDSHAKE_MAGIC);
        out.extend_from_slice(&record);
        Ok(out)
    }

    /// `Ok(None)` if the datagram is not a handshake packet at all
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, CodecError> {
        match bytes.strip_prefix(&HANDSHAKE_MAGIC[..]) {
            Some(record) => codec::decode_record(record).map(Some),
            None => Ok(None),
        }
    }
}

/// Bytes the server signs to vouch for its ephemeral key
pub fn offer_transcript(nonce: &Nonce, server_public: &[u8; PUBLIC_KEY_BYTES]) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(OFFER_CONTEXT.len() + NONCE_BYTES + PUBLIC_KEY_BYTES);
    transcript.extend_from_slice(OFFER_CONTEXT);
    transcript.extend_from_slice(nonce);
    transcript.extend_from_slice(server_public);
    transcript
}

/// HKDF label binding the key-wrapping key to one exchange
pub fn wrap_label(nonce: &Nonce) -> Vec<u8> {
    let mut label = Vec::with_capacity(WRAP_CONTEXT.len() + NONCE_BYTES);
    label.extend_from_slice(WRAP_CONTEXT);
    label.extend_from_slice(nonce);
    label
}
