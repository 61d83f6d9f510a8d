//! Event types for the quaver session
//!
//! The daemon uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many session event fan-out
//!   for observers (UI layer, tests)
//! - **Command channel** (tokio::mpsc): request -> the single session owner
//!
//! Events are observational only; no component mutates state in response
//! to its own broadcast.

use crate::model::{PlaybackState, Track};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Session events broadcast to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A track started playing
    TrackStarted {
        track: Track,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Lifecycle state changed
    StateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback position update (throttled by the adapter)
    Progress {
        track_id: String,
        position_secs: f64,
        duration_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents or order changed
    QueueChanged {
        length: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Volume changed (0-100 user scale)
    VolumeChanged {
        volume: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A non-fatal playback error was absorbed (track skipped, queue continues)
    PlaybackError {
        track_id: Option<String>,
        message: String,
        fatal: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Previous run ended uncleanly; state was restored without auto-play
    ResumedUnclean {
        track_id: Option<String>,
        position_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Orderly shutdown finished
    ShutdownComplete {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SessionEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::TrackStarted { .. } => "TrackStarted",
            SessionEvent::StateChanged { .. } => "StateChanged",
            SessionEvent::Progress { .. } => "Progress",
            SessionEvent::QueueChanged { .. } => "QueueChanged",
            SessionEvent::VolumeChanged { .. } => "VolumeChanged",
            SessionEvent::PlaybackError { .. } => "PlaybackError",
            SessionEvent::ResumedUnclean { .. } => "ResumedUnclean",
            SessionEvent::ShutdownComplete { .. } => "ShutdownComplete",
        }
    }
}

/// Broadcast bus for session events
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlaybackState;

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_no_subscribers() {
        let bus = EventBus::new(8);
        // Must not panic without subscribers
        bus.emit(SessionEvent::ShutdownComplete {
            timestamp: chrono::Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_eventbus_emit_with_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(SessionEvent::StateChanged {
            old_state: PlaybackState::Idle,
            new_state: PlaybackState::Loading,
            timestamp: chrono::Utc::now(),
        });

        let received = rx.recv().await.unwrap();
        match received {
            SessionEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => {
                assert_eq!(old_state, PlaybackState::Idle);
                assert_eq!(new_state, PlaybackState::Loading);
            }
            other => panic!("wrong event type: {}", other.event_type()),
        }
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SessionEvent::VolumeChanged {
            volume: 80,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"VolumeChanged\""));
    }
}
