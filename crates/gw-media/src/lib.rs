//! # Gateway Media
//!
//! The media bridge (L9, §4.7): capability negotiation between the
//! streaming and signaling sides, G.711 companded audio transcoding,
//! the narrowband VBR mode-table fallback, and the proprietary and
//! H.264 video packetizers.
//!
//! ## Module structure
//!
//! - [`capability`]: the format table, post-negotiation labels, and
//!   offer/negotiate logic
//! - [`companding`]: G.711 mu-law/A-law encode/decode
//! - [`vbr`]: the narrowband VBR mode-to-bit-length table and the
//!   optional injected [`vbr::AudioCodecModule`]
//! - [`video_proprietary`]: the proprietary video chunker/dechunker
//! - [`h264`]: AVC configuration record parsing, NAL/FU-A packetizing,
//!   and access-unit reassembly
//! - [`bridge`]: [`bridge::MediaBridge`], tying one call's negotiated
//!   formats to the direction A/B paths
//! - [`rtp_transport`]: [`rtp_transport::RtpTransport`], the RTP stack
//!   boundary (§6.3)
//! - [`rtp_udp`]: the real UDP-backed [`rtp_transport::RtpTransport`]
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod capability;
pub mod companding;
pub mod error;
pub mod h264;
pub mod rtp_transport;
pub mod rtp_udp;
pub mod vbr;
pub mod video_proprietary;

pub use bridge::MediaBridge;
pub use capability::{negotiate, offer_for, AudioLabel, Format, Medium, Negotiated, VideoLabel, FORMATS};
pub use error::Error;
pub use rtp_transport::{RtpPacket, RtpTransport};
pub use rtp_udp::UdpRtpTransport;
