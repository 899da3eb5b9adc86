//! # Gateway Rendezvous
//!
//! The UDP rendezvous (peer-to-peer media session) engine: packet
//! scrambling and per-packet AES-CBC encryption (§4.3), a four-way
//! handshake with cookie-based anti-flood (§4.3/§4.4), reliable ordered
//! Flow/FlowWriter substreams, per-session keepalive and the management
//! sweep (§4.4), and an optional man-in-the-middle mode (§4.5).
//!
//! ## Module structure
//!
//! - [`packet`]: scrambling, checksum, and the encrypted envelope
//! - [`chunk`]: the flags/timestamp/echo header and chunk sequence inside
//!   a decrypted packet
//! - [`cookie`]: the anti-flood cookie table
//! - [`handshake`]: the responder (and initiator, for MITM) handshake
//!   state machine
//! - [`varint7`]: the flow layer's 7-bit continuation varint
//! - [`flow`] / [`flow_writer`]: the receive/send halves of a reliable
//!   substream
//! - [`session`]: one established session's keys, flows, and keepalive
//!   state
//! - [`manager`]: the session table and periodic management sweep
//! - [`mitm`]: the man-in-the-middle session
//! - [`socket`]: the async UDP socket wrapper
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod cookie;
pub mod error;
pub mod flow;
pub mod flow_writer;
pub mod handshake;
pub mod manager;
pub mod mitm;
pub mod packet;
pub mod session;
pub mod socket;
pub mod varint7;

pub use chunk::NetworkLayer;
pub use cookie::CookieTable;
pub use error::Error;
pub use handshake::{Handshake, InitiatorHandshake};
pub use manager::SessionManager;
pub use mitm::MitmSession;
pub use session::Session;
pub use socket::RendezvousSocket;
