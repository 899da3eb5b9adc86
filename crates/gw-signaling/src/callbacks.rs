//! Indications the core invokes on the streaming client (§6.4), realized
//! as a plain trait `gw-server` implements over its `gw-stream`
//! connection's command dispatch.

use async_trait::async_trait;

/// The streaming-side collaborator a [`crate::agent::UserAgent`] reports
/// call progress to.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// A provisional response arrived (e.g. "180 Ringing").
    async fn ringing(&self, reason: &str);

    /// The call was accepted; carries the negotiated codec labels
    /// (§4.7's post-negotiation labels).
    async fn accepted(&self, audio: Option<&str>, video: Option<&str>);

    /// The call, or a pending invite, was rejected.
    async fn rejected(&self, reason: &str);

    /// An incoming invitation is queued, awaiting `accept`/`reject`.
    async fn invited(&self, from_uri: &str, to_uri: &str);

    /// An incoming invitation was cancelled by its originator before
    /// being answered.
    async fn cancelled(&self, from_uri: &str, to_uri: &str);

    /// The call ended.
    async fn byed(&self);

    /// The call's hold state changed, locally or by the peer.
    async fn holded(&self, on_hold: bool);

    /// One inbound audio frame arrived on the call's RTP leg, already
    /// decoded to linear PCM16 (§4.7 "Audio direction B"). The streaming
    /// side re-encodes it at whatever format selector its player expects.
    async fn inbound_audio(&self, timestamp: u32, pcm: Vec<i16>) {
        let _ = (timestamp, pcm);
    }

    /// One inbound video message was reassembled from the call's RTP leg
    /// (§4.7 "Video direction B", proprietary format). `kind` is the
    /// streaming message type tag the original sender embedded.
    async fn inbound_video(&self, kind: u32, timestamp: u32, body: Vec<u8>) {
        let _ = (kind, timestamp, body);
    }
}
