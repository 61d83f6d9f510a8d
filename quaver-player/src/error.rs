//! Error types for the quaver playback daemon

use thiserror::Error;

/// Main error type for the daemon
#[derive(Error, Debug)]
pub enum Error {
    /// Bad request parameter from the control surface
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Playback engine process failure (spawn, IPC, crash)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Stream resolution failure (resolver subprocess, expired URL)
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Playback temporarily unavailable (engine restarting, fatal backoff)
    #[error("Playback unavailable: {0}")]
    PlaybackUnavailable(String),

    /// Cache write failure; playback continues uncached
    #[error("Cache write error: {0}")]
    CacheWrite(String),

    /// Cache index database errors
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Control protocol violation (oversized request, malformed JSON)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Download transfer errors
    #[error("Download error: {0}")]
    Download(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared errors from quaver-common
    #[error(transparent)]
    Common(#[from] quaver_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Protocol-level error code reported to control clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::Engine(_) => "engine",
            Error::Resolve(_) => "resolve",
            Error::PlaybackUnavailable(_) => "playback_unavailable",
            Error::CacheWrite(_) => "cache_write",
            Error::Storage(_) => "storage",
            Error::Protocol(_) => "protocol",
            Error::Download(_) => "download",
            Error::Io(_) => "io",
            Error::Common(quaver_common::Error::InvalidInput(_)) => "invalid_input",
            Error::Common(_) => "internal",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

/// Convenience Result type using the daemon Error
pub type Result<T> = std::result::Result<T, Error>;
