//! # Quaver Player
//!
//! Headless playback daemon for remote-catalog audio: a playback queue
//! with shuffle and repeat, an adapter over an external playback engine,
//! a size-bounded on-disk audio cache, and a unix-socket control surface
//! driven by the `quaverctl` CLI.

pub mod cache;
pub mod control;
pub mod download;
pub mod error;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod snapshot;

pub use error::{Error, Result};
