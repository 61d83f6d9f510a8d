//! Domain model types shared across the daemon and control CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A track from the remote catalog.
///
/// Identity and metadata are immutable once constructed. The resolved
/// stream reference (URL + expiry) is deliberately *not* stored here; it
/// lives in the resolver cache keyed by track id so that a stale URL can
/// be refreshed without touching queue contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Catalog identifier (opaque to the core)
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    /// Duration in seconds as reported by the catalog, when known
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration_secs: None,
        }
    }
}

/// Repeat mode for the playback queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    /// Cycle OFF -> ALL -> ONE -> OFF
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "off"),
            RepeatMode::All => write!(f, "all"),
            RepeatMode::One => write!(f, "one"),
        }
    }
}

/// Session lifecycle state exposed to the control surface.
///
/// `Loading` covers the window between a load request and the engine's
/// started event; `Advancing` is the transient hop between end-of-track
/// and the next load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Advancing,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Advancing => write!(f, "advancing"),
        }
    }
}

/// Audio quality hint passed to the stream resolver and cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
        }
    }
}

/// A resolved stream reference: playable URL plus expiry.
///
/// Expiry is checked before reuse; a stale source triggers re-resolution
/// rather than a failed play attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSource {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    /// Container/codec name when known (used for the cache file suffix)
    #[serde(default)]
    pub format: Option<String>,
}

impl StreamSource {
    /// True if the URL is expired or within `buffer_secs` of expiry.
    pub fn is_stale(&self, buffer_secs: i64) -> bool {
        Utc::now() >= self.expires_at - chrono::Duration::seconds(buffer_secs)
    }
}
