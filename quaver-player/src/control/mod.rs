//! Control surface - unix socket command interface
//!
//! Architecture:
//! - `protocol.rs` - wire types and the command whitelist
//! - `server.rs` - socket listener, permission setup, request dispatch
//! - `client.rs` - one-shot client used by `quaverctl`
//!
//! Authorization is filesystem permissions: the socket lives in an
//! owner-only runtime directory and is itself chmod 0600 before the
//! first accept. There is no in-band authentication.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use server::ControlServer;
