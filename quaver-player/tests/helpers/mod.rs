//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use quaver_common::events::EventBus;
use quaver_common::model::{Quality, StreamSource};
use quaver_player::cache::AudioCache;
use quaver_player::download::Downloader;
use quaver_player::player::{EngineConfig, EngineEvent};
use quaver_player::resolver::{CachedResolver, StreamResolver};
use quaver_player::session::{Session, SessionConfig, SessionHandle};
use quaver_player::snapshot::SnapshotStore;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Resolver that never touches the network: every id resolves to a
/// synthetic URL with a far-future expiry.
pub struct ScriptedResolver;

#[async_trait]
impl StreamResolver for ScriptedResolver {
    async fn resolve(
        &self,
        track_id: &str,
        _quality: Quality,
    ) -> quaver_player::Result<StreamSource> {
        Ok(StreamSource {
            url: format!("https://stream.invalid/{}", track_id),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(6),
            format: None,
        })
    }
}

/// Boot a full session actor (no engine process is spawned until a play
/// command) rooted in `data_dir`, with its event bus.
pub async fn spawn_session(data_dir: &Path) -> (SessionHandle, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new(64));
    let handle = spawn_session_with_bus(data_dir, Arc::clone(&bus)).await;
    (handle, bus)
}

/// Like [`spawn_session`], but also returns the adapter-event sender
/// and the shared generation counter, so a test can stand in for the
/// engine reader and drive the state machine directly.
pub async fn spawn_session_with_engine(
    data_dir: &Path,
) -> (
    SessionHandle,
    Arc<EventBus>,
    mpsc::Sender<EngineEvent>,
    Arc<AtomicU64>,
) {
    let bus = Arc::new(EventBus::new(64));
    let (session, handle, command_rx) = build_session(data_dir, Arc::clone(&bus)).await;
    let events = session.engine_events();
    let generation = session.generation();
    tokio::spawn(session.run(command_rx));
    (handle, bus, events, generation)
}

pub async fn spawn_session_with_bus(data_dir: &Path, bus: Arc<EventBus>) -> SessionHandle {
    let (session, handle, command_rx) = build_session(data_dir, bus).await;
    tokio::spawn(session.run(command_rx));
    handle
}

async fn build_session(
    data_dir: &Path,
    bus: Arc<EventBus>,
) -> (
    Session<ScriptedResolver>,
    SessionHandle,
    mpsc::Receiver<quaver_player::session::SessionCommand>,
) {
    let cache = Arc::new(
        AudioCache::open(&data_dir.join("audio"), 64 * 1024 * 1024)
            .await
            .unwrap(),
    );
    let downloader = Arc::new(Downloader::new(Arc::clone(&cache)).unwrap());
    let resolver = Arc::new(CachedResolver::new(ScriptedResolver));
    let snapshots = SnapshotStore::new(data_dir.join("session.json"));

    let config = SessionConfig {
        engine: EngineConfig {
            // Never spawned by these tests; a bogus binary keeps any
            // accidental spawn from touching a real player.
            binary: "/nonexistent/engine".into(),
            socket_path: data_dir.join("engine.sock"),
            gapless: false,
        },
        quality: Quality::High,
    };

    Session::new(config, resolver, cache, downloader, snapshots, bus).unwrap()
}
