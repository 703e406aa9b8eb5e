//! Versioned record format shared by both channels.
//!
//! A record is `[format version: u8][bincode body]`. The reliable channel additionally frames
//! every record as `[length: u32 big-endian][record]`; the datagram channel seals one record per
//! datagram and needs no framing.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use super::Message;
use crate::error::CodecError;

pub const FORMAT_VERSION: u8 = 1;

/// Largest record the reliable channel will accept in a single frame
pub const MAX_FRAME_BYTES: usize = 1024 * 1024; // 1 MiB

const FRAME_HEADER_BYTES: usize = 4;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_BYTES as u64)
}

pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    let body = options()
        .serialize(record)
        .map_err(|err| CodecError::SerializeFailed {
            reason: err.to_string(),
        })?;

    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let Some((version, body)) = bytes.split_first() else {
        return Err(CodecError::Truncated { len: bytes.len() });
    };
    if *version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: *version,
            expected: FORMAT_VERSION,
        });
    }

    options()
        .deserialize(body)
        .map_err(|err| CodecError::InvalidBody {
            reason: err.to_string(),
        })
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, CodecError> {
    encode_record(message)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, CodecError> {
    decode_record(bytes)
}

/// Prefixes a record with its length, ready to be written to the stream
pub fn write_frame(record: &[u8]) -> Result<Vec<u8>, CodecError> {
    if record.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge {
            len: record.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + record.len());
    out.extend_from_slice(&(record.len() as u32).to_be_bytes());
    out.extend_from_slice(record);
    Ok(out)
}

/// Accumulates stream bytes and splits them back into records
#[derive(Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete record, `None` if more bytes are needed.
    ///
    /// An oversized length header is unrecoverable: the stream can no longer be resynchronised.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.buffer.len() < FRAME_HEADER_BYTES {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_BYTES];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_BYTES]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge {
                len,
                max: MAX_FRAME_BYTES,
            });
        }

        if self.buffer.len() < FRAME_HEADER_BYTES + len {
            return Ok(None);
        }

        let record = self.buffer[FRAME_HEADER_BYTES..FRAME_HEADER_BYTES + len].to_vec();
        self.buffer.drain(..FRAME_HEADER_BYTES + len);
        Ok(Some(record))
    }
}
