//! # Quaver Common Library
//!
//! Shared code for the quaver playback daemon and its control CLI:
//! - Domain model types (Track, RepeatMode, PlaybackState, StreamSource)
//! - Session event types and broadcast EventBus
//! - Bootstrap configuration loading
//! - Seek-target parsing and time formatting

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod time;

pub use error::{Error, Result};
