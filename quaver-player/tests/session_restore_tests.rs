//! Session snapshot restore behavior
//!
//! Restore rebuilds the queue, modes, and volume but never starts
//! playback on its own; an unclean previous exit is surfaced as an
//! event, not an error.

mod helpers;

use quaver_common::events::{EventBus, SessionEvent};
use quaver_common::model::{PlaybackState, RepeatMode, Track};
use quaver_player::snapshot::{SessionSnapshot, SnapshotStore};
use std::sync::Arc;

fn snapshot_with_tracks(clean_exit: bool) -> SessionSnapshot {
    SessionSnapshot {
        version: 1,
        clean_exit,
        tracks: vec![
            Track::new("t0", "Zero", "A"),
            Track::new("t1", "One", "B"),
            Track::new("t2", "Two", "C"),
        ],
        play_order: vec![2, 0, 1],
        position: Some(1),
        shuffle: true,
        repeat: RepeatMode::All,
        volume: 42,
        track_position_secs: 17.5,
        saved_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_restore_rebuilds_state_without_autoplay() {
    let dir = tempfile::tempdir().unwrap();
    SnapshotStore::new(dir.path().join("session.json"))
        .save(&snapshot_with_tracks(true))
        .unwrap();

    let (session, _bus) = helpers::spawn_session(dir.path()).await;
    let status = session.status().await.unwrap();

    // Queue, order, modes, and volume are back; playback is not
    assert_eq!(status.state, PlaybackState::Idle);
    assert_eq!(status.queue_length, 3);
    assert_eq!(status.queue_position, Some(1));
    assert!(status.shuffle);
    assert_eq!(status.repeat, RepeatMode::All);
    assert_eq!(status.volume, 42);
    // play_order[1] == 0, so the current track is t0
    assert_eq!(status.track.unwrap().id, "t0");
}

#[tokio::test]
async fn test_unclean_exit_surfaces_event() {
    let dir = tempfile::tempdir().unwrap();
    SnapshotStore::new(dir.path().join("session.json"))
        .save(&snapshot_with_tracks(false))
        .unwrap();

    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let _session = helpers::spawn_session_with_bus(dir.path(), Arc::clone(&bus)).await;

    let event = events.recv().await.unwrap();
    match event {
        SessionEvent::ResumedUnclean {
            track_id,
            position_secs,
            ..
        } => {
            assert_eq!(track_id.as_deref(), Some("t0"));
            assert_eq!(position_secs, 17.5);
        }
        other => panic!("expected ResumedUnclean, got {}", other.event_type()),
    }
}

#[tokio::test]
async fn test_clean_restore_emits_no_unclean_event() {
    let dir = tempfile::tempdir().unwrap();
    SnapshotStore::new(dir.path().join("session.json"))
        .save(&snapshot_with_tracks(true))
        .unwrap();

    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let session = helpers::spawn_session_with_bus(dir.path(), Arc::clone(&bus)).await;
    // Force a round trip so any startup events would have been emitted
    session.status().await.unwrap();

    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_startup_clears_clean_exit_and_shutdown_sets_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("session.json"));
    store.save(&snapshot_with_tracks(true)).unwrap();

    let (session, _bus) = helpers::spawn_session(dir.path()).await;
    // While running, the on-disk flag says unclean
    assert!(!store.load().unwrap().clean_exit);

    session.shutdown().await.unwrap();
    let saved = store.load().unwrap();
    assert!(saved.clean_exit);
    assert_eq!(saved.tracks.len(), 3);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("session.json"), "{broken").unwrap();

    let (session, _bus) = helpers::spawn_session(dir.path()).await;
    let status = session.status().await.unwrap();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.state, PlaybackState::Idle);
}

#[tokio::test]
async fn test_queue_mutations_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("session.json"));

    let (session, _bus) = helpers::spawn_session(dir.path()).await;
    session
        .queue_add(vec![
            Track::new("x1", "One", "A"),
            Track::new("x2", "Two", "B"),
        ])
        .await
        .unwrap();
    session.volume(Some(77)).await.unwrap();

    let saved = store.load().unwrap();
    assert_eq!(saved.tracks.len(), 2);
    assert_eq!(saved.volume, 77);
    assert!(!saved.clean_exit);
}
