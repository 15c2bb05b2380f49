// Codec error types
use std::collections::TryReserveError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Declared lengths disagree with the bytes of the packet.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// A header whose value cannot be represented; `len` bytes may be skipped.
    #[error("unsupported header 0x{id:02x} ({len} bytes)")]
    UnsupportedHeaderKind { id: u8, len: usize },

    /// The input ended early. Not a failure: buffer more bytes and retry.
    #[error("truncated input, {needed} more bytes needed")]
    TruncatedInput { needed: usize },

    #[error("header 0x{id:02x} does not carry this value kind")]
    KindMismatch { id: u8 },

    #[error("header 0x{id:02x} of {len} bytes cannot fit a {mtu} byte packet")]
    HeaderTooLarge { id: u8, len: usize, mtu: usize },

    #[error("buffer allocation failed: {0}")]
    Alloc(#[from] TryReserveError),
}

impl CodecError {
    pub fn is_truncated(&self) -> bool {
        matches!(self, CodecError::TruncatedInput { .. })
    }
}
