//! Wire protocol between a client and the partition server.
//!
//! Both directions carry the same payload: a [`SyncDelta`](crate::SyncDelta)
//! wrapped in a versioned envelope and encoded with bincode.

pub mod encoding;

pub use encoding::{decode_delta, encode_delta, CodecError, WireEnvelope};

/// Current protocol version.
///
/// Increment when making breaking changes to the payload layout.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum accepted message size (50 MB).
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// HTTP content type for encoded deltas.
pub const CONTENT_TYPE: &str = "application/octet-stream";
