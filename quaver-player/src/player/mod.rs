//! Player adapter over the external playback engine
//!
//! Architecture:
//! - `engine.rs` - engine process spawn + JSON IPC connection and commands
//!
//! The adapter is **property-observation-driven**: on every fresh
//! connection we observe time-pos, duration, and pause, and the engine
//! pushes a property-change event whenever a value changes. End-of-track
//! and crash detection also arrive as events; the session never polls.
//!
//! Every event carries the load **generation** current when it was
//! emitted. The session bumps the generation on each load, so events
//! from a superseded or crashed engine instance are recognizably stale
//! and dropped instead of corrupting the current track's state.

mod engine;

pub use engine::{Engine, EngineConfig, EngineHandle};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Duplicate end-of-track signals arriving within this window of a load
/// are treated as echoes of the load itself, not a real track end.
pub const MIN_TRACK_TIME: Duration = Duration::from_millis(500);

/// Why a track stopped playing in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Natural end of file: triggers queue advance
    Eof,
    /// Stopped because a new load replaced it
    Replaced,
    /// Engine reported a playback error
    Error,
    /// Explicit stop
    Stopped,
}

/// Events pushed from the engine reader task into the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The loaded file started producing audio
    Started { generation: u64 },
    /// Position update
    Progress {
        generation: u64,
        position_secs: f64,
        duration_secs: Option<f64>,
    },
    /// Pause state changed
    PauseChanged { generation: u64, paused: bool },
    /// Track ended
    Ended { generation: u64, reason: EndReason },
    /// Engine process exited without being asked to
    Crashed { generation: u64 },
}

impl EngineEvent {
    pub fn generation(&self) -> u64 {
        match self {
            EngineEvent::Started { generation }
            | EngineEvent::Progress { generation, .. }
            | EngineEvent::PauseChanged { generation, .. }
            | EngineEvent::Ended { generation, .. }
            | EngineEvent::Crashed { generation } => *generation,
        }
    }
}

/// At-most-once advance claim per load generation.
///
/// The engine can deliver the same end-of-track more than once (an eof
/// event plus an idle transition, or an event racing a crash report).
/// Whoever claims the generation first performs the queue advance; every
/// other claimant for the same or an older generation is refused.
#[derive(Debug)]
pub struct AdvanceGuard {
    /// Highest generation for which an advance has been claimed
    claimed: AtomicU64,
}

impl AdvanceGuard {
    pub fn new() -> Self {
        Self {
            claimed: AtomicU64::new(0),
        }
    }

    /// Attempt to claim the advance for `generation`.
    ///
    /// Returns false when the generation was already claimed, when it is
    /// older than a claimed one, or when the track has been loaded for
    /// less than [`MIN_TRACK_TIME`] (an end signal that fast is an echo
    /// of the load, not a finished track).
    pub fn try_claim(&self, generation: u64, elapsed_since_load: Duration) -> bool {
        if elapsed_since_load < MIN_TRACK_TIME {
            return false;
        }
        loop {
            let prev = self.claimed.load(Ordering::Acquire);
            if prev >= generation {
                return false;
            }
            match self.claimed.compare_exchange_weak(
                prev,
                generation,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }
}

impl Default for AdvanceGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ELAPSED: Duration = Duration::from_secs(10);

    #[test]
    fn test_claim_once_per_generation() {
        let guard = AdvanceGuard::new();
        assert!(guard.try_claim(1, ELAPSED));
        assert!(!guard.try_claim(1, ELAPSED));
        assert!(guard.try_claim(2, ELAPSED));
        assert!(!guard.try_claim(2, ELAPSED));
    }

    #[test]
    fn test_stale_generation_refused() {
        let guard = AdvanceGuard::new();
        assert!(guard.try_claim(5, ELAPSED));
        assert!(!guard.try_claim(3, ELAPSED));
        assert!(!guard.try_claim(5, ELAPSED));
        assert!(guard.try_claim(6, ELAPSED));
    }

    #[test]
    fn test_debounce_refuses_early_end() {
        let guard = AdvanceGuard::new();
        assert!(!guard.try_claim(1, Duration::from_millis(100)));
        // The generation was NOT consumed by the refused claim
        assert!(guard.try_claim(1, ELAPSED));
    }

    #[test]
    fn test_concurrent_duplicate_signals_yield_one_claim() {
        // Many tasks race to claim the same generation; exactly one wins.
        let guard = Arc::new(AdvanceGuard::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = Arc::clone(&guard);
            handles.push(std::thread::spawn(move || guard.try_claim(7, ELAPSED)));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_engine_event_generation_accessor() {
        let event = EngineEvent::Ended {
            generation: 4,
            reason: EndReason::Eof,
        };
        assert_eq!(event.generation(), 4);
        assert_eq!(EngineEvent::Crashed { generation: 9 }.generation(), 9);
    }
}
