//! # Gateway Server
//!
//! The gateway daemon: wires the TCP streaming engine ([`gw_stream`]),
//! the UDP rendezvous engine ([`gw_rendezvous`]), and the SIP-style
//! signaling bridge ([`gw_signaling`], [`gw_media`]) together behind one
//! configurable process (§0, §6.5).
//!
//! ## Module structure
//!
//! - [`config`]: the recognized option set and its TOML/CLI surface
//! - [`error`]: the top-level error type composing every engine's own
//! - [`bridge_handler`]: the bridge application's `CommandHandler`,
//!   wiring a [`gw_signaling::UserAgent`] to each bridge connection
//! - [`cli`]: the flag surface, merged over a loaded [`config::Config`]
//! - [`signaling_udp`]: a concrete `SignalingTransport` over UDP
//! - [`streaming_acceptor`]: the TCP accept loop
//! - [`rendezvous_acceptor`]: the UDP accept loop, handshake, and sweep

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge_handler;
pub mod cli;
pub mod config;
pub mod error;
pub mod rendezvous_acceptor;
pub mod signaling_udp;
pub mod streaming_acceptor;

pub use config::Config;
pub use error::Error;
