//! Error types for the signaling user agent.

use thiserror::Error;

/// Errors raised by a [`crate::agent::UserAgent`] operation.
#[derive(Debug, Error)]
pub enum Error {
    /// A second `invite` was issued while a call was already pending or
    /// active (§4.6: "At most one active call per user agent").
    #[error("already in an active or pending call")]
    AlreadyInCall,

    /// `accept` was called but no offer could be negotiated against the
    /// supplied codec list (§4.6: "488 Incompatible SDP").
    #[error("488 incompatible sdp")]
    IncompatibleSdp,

    /// No invitation is queued to `accept`/`reject`.
    #[error("no pending invitation")]
    NoPendingInvitation,

    /// No call or pending invite to `bye`.
    #[error("no active call or pending invite")]
    NoActiveCall,

    /// The registration binding was rejected by the signaling peer.
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    /// The invitation response timed out (§5 "a user-agent-level timeout").
    #[error("invitation response timed out")]
    InvitationTimeout,

    /// Error surfaced by the underlying media bridge.
    #[error(transparent)]
    Media(#[from] gw_media::Error),

    /// Error surfaced by the signaling transport.
    #[error("signaling transport error: {0}")]
    Transport(String),
}
