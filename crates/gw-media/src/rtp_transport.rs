//! The RTP stack boundary (§6.3): "open a pair of UDP sockets (media +
//! control, media's port chosen even from a configurable range with
//! configurable retries), send(payload, ts, marker, fmt), and a receive
//! callback (payload, remote, fmt)." [`crate::bridge::MediaBridge`]
//! transcodes bytes; this trait carries them.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Error;

/// One inbound RTP packet, already stripped of its header.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    /// The encoded media payload.
    pub payload: Vec<u8>,
    /// The peer the packet arrived from.
    pub remote: SocketAddr,
    /// RTP payload type carried in the packet header.
    pub format: u8,
    /// RTP timestamp carried in the packet header.
    pub timestamp: u32,
    /// The marker bit (frame/talkspurt boundary).
    pub marker: bool,
}

/// A bound pair of media/control sockets for one call leg.
#[async_trait]
pub trait RtpTransport: Send + Sync {
    /// The bound media socket's local port (even, per RTP convention).
    fn local_media_port(&self) -> u16;

    /// The bound control socket's local port (`local_media_port() + 1`).
    fn local_control_port(&self) -> u16;

    /// Fix the remote media endpoint this transport sends to and accepts
    /// from, once the peer's offer/answer is known.
    async fn connect(&self, remote_media: SocketAddr) -> Result<(), Error>;

    /// Send one RTP packet to the connected remote endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying send fails.
    async fn send(&self, payload: &[u8], timestamp: u32, marker: bool, format: u8) -> Result<(), Error>;

    /// Receive the next inbound packet, or `None` once the transport is
    /// closed.
    async fn recv(&self) -> Option<RtpPacket>;
}
