//! Session snapshot persistence
//!
//! The whole restorable session (queue, modes, volume, position in the
//! current track) is one JSON document replaced atomically: write to a
//! temp file in the same directory, then rename over the target. A crash
//! mid-save leaves the previous snapshot intact.
//!
//! `clean_exit` implements unclean-shutdown detection: it is forced to
//! false as soon as the daemon starts and only set true again by an
//! orderly shutdown. A restore that reads false knows the previous run
//! died.

use crate::error::{Error, Result};
use quaver_common::model::{RepeatMode, Track};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub clean_exit: bool,
    pub tracks: Vec<Track>,
    pub play_order: Vec<usize>,
    pub position: Option<usize>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    /// 0-100 user scale
    pub volume: u8,
    /// Position within the current track when saved
    pub track_position_secs: f64,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl SessionSnapshot {
    pub fn empty(volume: u8) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            clean_exit: false,
            tracks: Vec::new(),
            play_order: Vec::new(),
            position: None,
            shuffle: false,
            repeat: RepeatMode::Off,
            volume,
            track_position_secs: 0.0,
            saved_at: chrono::Utc::now(),
        }
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. Missing file is a fresh install; a corrupt or
    /// future-versioned file is logged and treated as absent rather than
    /// wedging startup.
    pub fn load(&self) -> Option<SessionSnapshot> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot unreadable");
                return None;
            }
        };
        match serde_json::from_str::<SessionSnapshot>(&content) {
            Ok(snapshot) if snapshot.version <= SNAPSHOT_VERSION => Some(snapshot),
            Ok(snapshot) => {
                warn!(version = snapshot.version, "snapshot from a newer version, ignoring");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot corrupt, ignoring");
                None
            }
        }
    }

    /// Atomically replace the snapshot file. The temp file is created
    /// owner-only before any bytes are written.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let Some(dir) = self.path.parent() else {
            return Err(Error::Internal(format!(
                "snapshot path has no parent: {}",
                self.path.display()
            )));
        };
        std::fs::create_dir_all(dir)?;

        let temp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(snapshot)?;

        {
            let mut open = std::fs::OpenOptions::new();
            open.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                open.mode(0o600);
            }
            let mut file = open.open(&temp)?;
            use std::io::Write;
            file.write_all(&json)?;
            file.sync_all()?;
        }

        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }

    /// Startup marker: whatever the snapshot says now, the current run
    /// has not exited cleanly yet. Returns the pre-existing snapshot for
    /// restore. A missing snapshot stays missing.
    pub fn mark_running(&self) -> Result<Option<SessionSnapshot>> {
        let existing = self.load();
        if let Some(snapshot) = &existing {
            let mut updated = snapshot.clone();
            updated.clean_exit = false;
            self.save(&updated)?;
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            clean_exit: true,
            tracks: vec![Track::new("t1", "Title", "Artist")],
            play_order: vec![0],
            position: Some(0),
            shuffle: false,
            repeat: RepeatMode::All,
            volume: 65,
            track_position_secs: 42.5,
            saved_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("session.json"));

        assert!(store.load().is_none());
        store.save(&sample()).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.clean_exit);
        assert_eq!(loaded.tracks.len(), 1);
        assert_eq!(loaded.volume, 65);
        assert_eq!(loaded.track_position_secs, 42.5);
    }

    #[test]
    fn test_corrupt_snapshot_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = SnapshotStore::new(&path);
        assert!(store.load().is_none());
    }

    #[test]
    fn test_future_version_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("session.json"));
        let mut snapshot = sample();
        snapshot.version = SNAPSHOT_VERSION + 10;
        store.save(&snapshot).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_mark_running_clears_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("session.json"));
        store.save(&sample()).unwrap();

        let restored = store.mark_running().unwrap().unwrap();
        // The returned snapshot is the pre-existing one (clean)
        assert!(restored.clean_exit);
        // But on disk the marker is now false
        assert!(!store.load().unwrap().clean_exit);
    }

    #[test]
    fn test_save_replaces_atomically_leaving_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("session.json"));
        store.save(&sample()).unwrap();
        let mut second = sample();
        second.volume = 10;
        store.save(&second).unwrap();

        assert_eq!(store.load().unwrap().volume, 10);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("session.json"));
        store.save(&sample()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
