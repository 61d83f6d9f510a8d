//! Playback queue: ordered tracks, shuffle permutation, repeat modes
//!
//! The queue is a pure in-memory structure owned by the session task; it
//! performs no I/O and knows nothing about the engine. Persistence goes
//! through the session snapshot.
//!
//! Two orderings coexist:
//! - `tracks` holds insertion order and never reorders
//! - `play_order` is a permutation of track indices; identity unless
//!   shuffle is enabled
//!
//! `position` indexes into `play_order`, never into `tracks` directly.

use quaver_common::model::{RepeatMode, Track};
use rand::seq::SliceRandom;
use rand::Rng;

/// Seconds into a track past which "previous" restarts the track
/// instead of moving back.
pub const PREVIOUS_RESTART_THRESHOLD_SECS: f64 = 3.0;

/// What an advance request resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Load this track next
    Track(Track),
    /// Queue exhausted; stop playback
    End,
}

#[derive(Debug, Clone)]
pub struct Queue {
    tracks: Vec<Track>,
    play_order: Vec<usize>,
    position: Option<usize>,
    shuffle: bool,
    repeat: RepeatMode,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            play_order: Vec::new(),
            position: None,
            shuffle: false,
            repeat: RepeatMode::Off,
        }
    }

    /// Restore a queue from snapshot parts. The permutation and position
    /// are validated; a corrupt snapshot falls back to insertion order.
    pub fn from_parts(
        tracks: Vec<Track>,
        play_order: Vec<usize>,
        position: Option<usize>,
        shuffle: bool,
        repeat: RepeatMode,
    ) -> Self {
        let valid_permutation = {
            let mut seen = vec![false; tracks.len()];
            play_order.len() == tracks.len()
                && play_order.iter().all(|&i| {
                    if i < seen.len() && !seen[i] {
                        seen[i] = true;
                        true
                    } else {
                        false
                    }
                })
        };
        let play_order = if valid_permutation {
            play_order
        } else {
            (0..tracks.len()).collect()
        };
        let position = position.filter(|&p| p < play_order.len());
        Self {
            tracks,
            play_order,
            position,
            shuffle,
            repeat,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    /// Position within the play order, for display
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Snapshot accessors
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn play_order(&self) -> &[usize] {
        &self.play_order
    }

    /// Currently selected track, if any
    pub fn current(&self) -> Option<&Track> {
        let pos = self.position?;
        self.tracks.get(self.play_order[pos])
    }

    /// Tracks in play order, for display
    pub fn ordered(&self) -> impl Iterator<Item = &Track> {
        self.play_order.iter().map(move |&i| &self.tracks[i])
    }

    /// Append a track. In shuffle mode the new track lands at a random
    /// play-order slot after the current position, so already-played
    /// history is not disturbed.
    pub fn push(&mut self, track: Track) {
        let track_index = self.tracks.len();
        self.tracks.push(track);

        if self.shuffle {
            let after = self.position.map(|p| p + 1).unwrap_or(0);
            let slot = rand::thread_rng().gen_range(after..=self.play_order.len());
            self.play_order.insert(slot, track_index);
        } else {
            self.play_order.push(track_index);
        }
    }

    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) {
        for track in tracks {
            self.push(track);
        }
    }

    /// Remove the track at the given play-order index. Returns the removed
    /// track. The position is adjusted so the current track stays current;
    /// removing the current track leaves the position pointing at its
    /// successor (or `None` when the queue empties).
    pub fn remove(&mut self, order_index: usize) -> Option<Track> {
        if order_index >= self.play_order.len() {
            return None;
        }
        let track_index = self.play_order.remove(order_index);
        let removed = self.tracks.remove(track_index);

        // Shift permutation entries past the removed track index
        for entry in self.play_order.iter_mut() {
            if *entry > track_index {
                *entry -= 1;
            }
        }

        self.position = match self.position {
            Some(_) if self.play_order.is_empty() => None,
            Some(p) if order_index < p => Some(p - 1),
            Some(p) if order_index == p => Some(p.min(self.play_order.len() - 1)),
            other => other,
        };

        Some(removed)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.play_order.clear();
        self.position = None;
    }

    /// Select the first track in play order without consuming an advance.
    /// Used when playback starts on a freshly loaded queue.
    pub fn begin(&mut self) -> Option<&Track> {
        if self.play_order.is_empty() {
            self.position = None;
            return None;
        }
        self.position = Some(0);
        self.current()
    }

    /// Jump to an explicit play-order index
    pub fn jump(&mut self, order_index: usize) -> Option<&Track> {
        if order_index >= self.play_order.len() {
            return None;
        }
        self.position = Some(order_index);
        self.current()
    }

    /// Advance after natural end-of-track. Honors repeat-one by returning
    /// the same track again.
    pub fn advance(&mut self) -> Advance {
        if self.repeat == RepeatMode::One {
            if let Some(track) = self.current() {
                return Advance::Track(track.clone());
            }
        }
        self.step_forward()
    }

    /// Explicit skip. Ignores repeat-one: the user asked to move on.
    pub fn next(&mut self) -> Advance {
        self.step_forward()
    }

    fn step_forward(&mut self) -> Advance {
        let Some(pos) = self.position else {
            return match self.begin() {
                Some(track) => Advance::Track(track.clone()),
                None => Advance::End,
            };
        };

        if pos + 1 < self.play_order.len() {
            self.position = Some(pos + 1);
        } else if self.repeat == RepeatMode::All && !self.play_order.is_empty() {
            self.position = Some(0);
        } else {
            // Position stays on the last track so "play" can restart it
            return Advance::End;
        }

        match self.current() {
            Some(track) => Advance::Track(track.clone()),
            None => Advance::End,
        }
    }

    /// Move to the previous track. At the head of the play order the
    /// current track is returned again (restart); with repeat-all it
    /// wraps to the tail instead.
    pub fn previous(&mut self) -> Option<&Track> {
        let pos = self.position?;
        if pos > 0 {
            self.position = Some(pos - 1);
        } else if self.repeat == RepeatMode::All && !self.play_order.is_empty() {
            self.position = Some(self.play_order.len() - 1);
        }
        self.current()
    }

    /// Enable or disable shuffle.
    ///
    /// Enabling with a current track pins it to the head of the new
    /// permutation and shuffles the rest. Enabling with no current track
    /// (fresh container load) shuffles everything and picks a random
    /// starting slot on `begin()`. Disabling restores insertion order and
    /// repoints the position at the same track.
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled == self.shuffle {
            return;
        }
        self.shuffle = enabled;

        if self.tracks.is_empty() {
            self.play_order.clear();
            self.position = None;
            return;
        }

        if enabled {
            let current_track = self.position.map(|p| self.play_order[p]);
            let mut rest: Vec<usize> =
                (0..self.tracks.len()).filter(|&i| Some(i) != current_track).collect();
            rest.shuffle(&mut rand::thread_rng());

            match current_track {
                Some(index) => {
                    self.play_order = std::iter::once(index).chain(rest).collect();
                    self.position = Some(0);
                }
                None => {
                    self.play_order = rest;
                    self.position = None;
                }
            }
        } else {
            let current_track = self.position.map(|p| self.play_order[p]);
            self.play_order = (0..self.tracks.len()).collect();
            self.position = current_track;
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}
