//! Error types for the streaming (TCP) engine.

use thiserror::Error;

/// Top-level streaming engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Chunk framing error (§7 `FramingError`)
    #[error("framing error: {0}")]
    Framing(#[from] ChunkError),

    /// Command dispatch error
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// The underlying TCP transport closed (§7 `TransportClosed`)
    #[error("transport closed")]
    TransportClosed,

    /// Structured value codec error surfaced while decoding a command body
    #[error("codec error: {0}")]
    Amf(#[from] gw_amf::AmfError),

    /// I/O error from the underlying socket
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk-framing-level errors (§4.1, §7 `FramingError`).
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Buffer too short to contain a declared header form
    #[error("chunk too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Basic header referenced a channel id escape form with no data
    #[error("truncated channel id")]
    TruncatedChannelId,

    /// A chunk referenced a stream id that was never registered with a
    /// FULL header
    #[error("chunk on channel {0} has no prior header to compress against")]
    NoPriorHeader(u32),

    /// Declared message size exceeds the configured maximum
    #[error("message size {0} exceeds maximum")]
    MessageTooLarge(u32),
}

/// Command/stream-lifecycle-level errors (§4.2, §7 `ApplicationReject`).
#[derive(Debug, Error)]
pub enum CommandError {
    /// `connect` advertised a codec version this implementation doesn't
    /// speak (§4.2 "Reject if the structured-value codec version advertised
    /// is not one of {0, 3}")
    #[error("unsupported object encoding: {0}")]
    UnsupportedObjectEncoding(f64),

    /// `publish` named a stream already owned by another publisher on the
    /// same application instance
    #[error("stream name already published: {0}")]
    NameAlreadyPublished(String),

    /// A command referenced a stream id the connection doesn't own
    #[error("unknown stream id: {0}")]
    UnknownStream(u32),

    /// The application's connect handler declined the connection
    #[error("application rejected connect: {0}")]
    ApplicationReject(String),
}
