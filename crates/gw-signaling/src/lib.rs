//! # Gateway Signaling
//!
//! The signaling user agent adapter (L8, §4.6): bridges a streaming
//! connection's call-control commands to a SIP-style signaling
//! transport and negotiates media with [`gw_media`].
//!
//! ## Module structure
//!
//! - [`agent`]: [`agent::UserAgent`], the register/invite/accept/reject/
//!   bye/hold/sendDTMF state machine
//! - [`transport`]: [`transport::SignalingTransport`], the signaling
//!   stack boundary (§6.3)
//! - [`callbacks`]: [`callbacks::StreamingClient`], the indications the
//!   core invokes on the streaming side (§6.4)
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod callbacks;
pub mod error;
pub mod transport;

pub use agent::{RtpConfig, UserAgent};
pub use callbacks::StreamingClient;
pub use error::Error;
pub use transport::{Request, SignalingTransport, Transaction};
