//! Error types for the media bridge.

use thiserror::Error;

/// Errors raised while negotiating or bridging media (§4.7).
#[derive(Debug, Error)]
pub enum Error {
    /// Neither side offered a payload type this bridge recognizes for the
    /// medium in question.
    #[error("incompatible SDP: no common {medium} codec")]
    IncompatibleSdp {
        /// Which medium ("audio" or "video") failed to negotiate.
        medium: &'static str,
    },

    /// A video fragment arrived out of order or with a broken chunk
    /// header and had to be dropped.
    #[error("dropped out-of-order or malformed video fragment: {0}")]
    DroppedFragment(&'static str),

    /// An H.264 access unit could not be reassembled.
    #[error("h264 reassembly failed: {0}")]
    H264Reassembly(&'static str),

    /// Audio transcoding was requested but no codec module is attached.
    #[error("no audio codec module available for this transcoding path")]
    NoCodecModule,

    /// Every candidate port in the configured range was taken after the
    /// configured number of retries.
    #[error("no free rtp port in the configured range after {0} attempts")]
    PortExhausted(u32),

    /// Underlying socket I/O failed.
    #[error("rtp transport io error: {0}")]
    Io(#[from] std::io::Error),
}
