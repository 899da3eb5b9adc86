//! Errors produced while decoding or encoding a structured value.

use thiserror::Error;

/// Errors from [`crate::decode_value`] / [`crate::encode_value`].
#[derive(Debug, Error)]
pub enum AmfError {
    /// Ran out of bytes mid-value.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Cursor offset at the point of failure.
        offset: usize,
    },

    /// A type marker byte this codec doesn't understand.
    #[error("unsupported type marker: 0x{0:02x}")]
    UnsupportedMarker(u8),

    /// A reference index pointed outside the table built so far.
    #[error("dangling reference index {0}")]
    DanglingReference(u32),

    /// A string was not valid UTF-8.
    #[error("malformed UTF-8 string")]
    MalformedString,

    /// The codec version requested by the caller isn't one this crate
    /// implements (only 0 and 3 are defined by the streaming protocol).
    #[error("unsupported codec version: {0}")]
    UnsupportedVersion(u8),
}
