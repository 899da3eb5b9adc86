//! # Gateway Stream
//!
//! The binary TCP streaming engine: chunk framing over a per-channel
//! compressed header state (§4.1), and the command/stream lifecycle that
//! rides on top of it (§4.2) - connect, stream creation, publish/play
//! fan-out, and per-`app` instance membership.
//!
//! ## Module structure
//!
//! - [`io`]: shared byte-level primitives (variable-length integers,
//!   scoped socket ownership)
//! - [`chunk`]: basic/message header framing, the chunk [`chunk::Assembler`]
//!   and [`chunk::Disassembler`], window acknowledgement and user-control
//! - [`command`]: the `(name, id, body, args…)` command codec
//! - [`app`]: the [`app::Application`] instance registry and publisher/
//!   player fan-out
//! - [`connection`]: the per-socket [`connection::Connection`] state
//!   machine tying the above together
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod chunk;
pub mod command;
pub mod connection;
pub mod error;
pub mod io;

pub use app::{Application, Registry};
pub use chunk::{Assembler, Disassembler, Message};
pub use command::Command;
pub use connection::{CommandHandler, Connection, NullHandler};
pub use error::Error;
