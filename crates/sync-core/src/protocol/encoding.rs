//! Delta encoding.
//!
//! Layout: a bincode-encoded [`WireEnvelope`]. The version is checked before
//! the delta is handed to the merge engine, so a peer speaking a newer layout
//! is rejected instead of being half-understood.

use super::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use crate::delta::SyncDelta;
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Empty message")]
    Empty,

    #[error("Unsupported protocol version {0} (expected {PROTOCOL_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Versioned wrapper around a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub version: u32,
    pub delta: SyncDelta,
}

/// Encode a delta for transmission.
pub fn encode_delta(delta: &SyncDelta) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        version: u32,
        delta: &'a SyncDelta,
    }

    let bytes = bincode::serialize(&Borrowed {
        version: PROTOCOL_VERSION,
        delta,
    })
    .map_err(|e| CodecError::Serialization(e.to_string()))?;

    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a received delta.
pub fn decode_delta(data: &[u8]) -> Result<SyncDelta> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let envelope: WireEnvelope = bincode::options()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(MAX_MESSAGE_SIZE as u64)
        .deserialize(data)
        .map_err(|e| CodecError::Deserialization(e.to_string()))?;

    if envelope.version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(envelope.version));
    }
    Ok(envelope.delta)
}
