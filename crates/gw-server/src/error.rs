//! Top-level gateway errors (§7): composes each engine's own `thiserror`
//! type via `#[from]` into one top-level enum.

use thiserror::Error;

/// Errors a running gateway process can surface. `anyhow` wraps this only
/// at the `main` boundary (§0 "`anyhow` is used only at the `gw-server`
/// binary boundary").
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded, parsed, or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// The streaming (TCP) engine failed.
    #[error("streaming engine error: {0}")]
    Stream(#[from] gw_stream::Error),

    /// The rendezvous (UDP) engine failed.
    #[error("rendezvous engine error: {0}")]
    Rendezvous(#[from] gw_rendezvous::Error),

    /// The signaling bridge failed.
    #[error("signaling error: {0}")]
    Signaling(#[from] gw_signaling::Error),

    /// The media bridge failed.
    #[error("media error: {0}")]
    Media(#[from] gw_media::Error),

    /// Underlying socket or file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
