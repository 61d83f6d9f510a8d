//! Playback session: single authoritative owner of all mutable state
//!
//! Everything that can change — the queue, the lifecycle state, the
//! engine handle, volume, positions — lives inside one actor task. The
//! control surface and CLI only send [`SessionCommand`]s; the engine
//! reader only sends [`EngineEvent`]s. After each mutation the session
//! broadcasts on the shared [`EventBus`].
//!
//! Stale-event discipline: every engine event carries the generation it
//! was emitted under. The session bumps the generation on every load, so
//! an event from a superseded load (or a crashed process) can never
//! mutate state belonging to the current track.

use crate::cache::AudioCache;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::player::{
    AdvanceGuard, EndReason, Engine, EngineConfig, EngineEvent, EngineHandle,
};
use crate::queue::{Advance, Queue, PREVIOUS_RESTART_THRESHOLD_SECS};
use crate::resolver::{CachedResolver, StreamResolver};
use crate::snapshot::{SessionSnapshot, SnapshotStore};
use quaver_common::events::{EventBus, SessionEvent};
use quaver_common::model::{PlaybackState, Quality, RepeatMode, Track};
use quaver_common::time::SeekTarget;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// A second engine crash inside this window is fatal instead of
/// triggering another respawn.
pub const CRASH_FATAL_WINDOW: Duration = Duration::from_secs(30);

/// After this many consecutive track failures the session stops
/// auto-advancing (prevents an infinite skip loop across a dead
/// network).
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

const COMMAND_BUFFER: usize = 32;
const ENGINE_EVENT_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Full session status report. The control surface serializes this as
/// the `status` reply body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub state: PlaybackState,
    pub track: Option<Track>,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    pub volume: u8,
    pub queue_length: usize,
    pub queue_position: Option<usize>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub cache_entries: usize,
    pub cache_bytes: u64,
    pub cache_budget_bytes: u64,
}

/// Currently-playing report; the `now` reply body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NowPayload {
    pub track: Track,
    pub state: PlaybackState,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub index: usize,
    pub track: Track,
    pub current: bool,
}

/// Queue listing in play order; the `queue` reply body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePayload {
    pub items: Vec<QueueItem>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}

/// Requests into the session actor.
pub enum SessionCommand {
    Play(Reply<()>),
    PlayAt(usize, Reply<()>),
    Pause(Reply<()>),
    Next(Reply<()>),
    Previous(Reply<()>),
    Seek(SeekTarget, Reply<f64>),
    SetShuffle(bool, Reply<()>),
    SetRepeat(RepeatMode, Reply<()>),
    Status(Reply<StatusPayload>),
    Now(Reply<Option<NowPayload>>),
    QueueList(Reply<QueuePayload>),
    QueueAdd(Vec<Track>, Reply<usize>),
    QueueClear(Reply<()>),
    Volume(Option<u8>, Reply<u8>),
    Shutdown(Reply<()>),
}

/// Cloneable sender half used by the control server and CLI paths.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::PlaybackUnavailable("session is not running".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::PlaybackUnavailable("session dropped the request".into()))?
    }

    pub async fn play(&self) -> Result<()> {
        self.request(SessionCommand::Play).await
    }

    pub async fn play_at(&self, index: usize) -> Result<()> {
        self.request(|reply| SessionCommand::PlayAt(index, reply))
            .await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(SessionCommand::Pause).await
    }

    pub async fn next(&self) -> Result<()> {
        self.request(SessionCommand::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.request(SessionCommand::Previous).await
    }

    pub async fn seek(&self, target: SeekTarget) -> Result<f64> {
        self.request(|reply| SessionCommand::Seek(target, reply)).await
    }

    pub async fn set_shuffle(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetShuffle(enabled, reply))
            .await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<()> {
        self.request(|reply| SessionCommand::SetRepeat(mode, reply))
            .await
    }

    pub async fn status(&self) -> Result<StatusPayload> {
        self.request(SessionCommand::Status).await
    }

    pub async fn now(&self) -> Result<Option<NowPayload>> {
        self.request(SessionCommand::Now).await
    }

    pub async fn queue_list(&self) -> Result<QueuePayload> {
        self.request(SessionCommand::QueueList).await
    }

    pub async fn queue_add(&self, tracks: Vec<Track>) -> Result<usize> {
        self.request(|reply| SessionCommand::QueueAdd(tracks, reply))
            .await
    }

    pub async fn queue_clear(&self) -> Result<()> {
        self.request(SessionCommand::QueueClear).await
    }

    pub async fn volume(&self, set_to: Option<u8>) -> Result<u8> {
        self.request(|reply| SessionCommand::Volume(set_to, reply))
            .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(SessionCommand::Shutdown).await
    }
}

pub struct SessionConfig {
    pub engine: EngineConfig,
    pub quality: Quality,
}

pub struct Session<R: StreamResolver + 'static> {
    config: SessionConfig,
    queue: Queue,
    state: PlaybackState,
    volume: u8,

    engine_handle: Option<EngineHandle>,
    engine_event_tx: mpsc::Sender<EngineEvent>,
    engine_event_rx: Option<mpsc::Receiver<EngineEvent>>,

    /// Monotonic load generation, shared with engine reader tasks
    generation: Arc<AtomicU64>,
    current_generation: u64,
    advance_guard: AdvanceGuard,
    load_started: Option<Instant>,

    position_secs: f64,
    duration_secs: Option<f64>,
    /// Restored position to use on the next play (never auto-played)
    resume_position_secs: Option<f64>,

    consecutive_failures: u32,
    last_crash_recovery: Option<Instant>,

    resolver: Arc<CachedResolver<R>>,
    downloader: Arc<Downloader>,
    cache: Arc<AudioCache>,
    snapshots: SnapshotStore,
    bus: Arc<EventBus>,
}

impl<R: StreamResolver + 'static> Session<R> {
    /// Build the session, restoring any previous snapshot. Restore never
    /// auto-plays; an unclean previous exit is surfaced as an event.
    pub fn new(
        config: SessionConfig,
        resolver: Arc<CachedResolver<R>>,
        cache: Arc<AudioCache>,
        downloader: Arc<Downloader>,
        snapshots: SnapshotStore,
        bus: Arc<EventBus>,
    ) -> Result<(Self, SessionHandle, mpsc::Receiver<SessionCommand>)> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (engine_event_tx, engine_event_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);

        let mut session = Self {
            config,
            queue: Queue::new(),
            state: PlaybackState::Idle,
            volume: quaver_common::config::DEFAULT_VOLUME,
            engine_handle: None,
            engine_event_tx,
            engine_event_rx: Some(engine_event_rx),
            generation: Arc::new(AtomicU64::new(0)),
            current_generation: 0,
            advance_guard: AdvanceGuard::new(),
            load_started: None,
            position_secs: 0.0,
            duration_secs: None,
            resume_position_secs: None,
            consecutive_failures: 0,
            last_crash_recovery: None,
            resolver,
            downloader,
            cache,
            snapshots,
            bus,
        };
        session.restore()?;

        Ok((session, SessionHandle { tx: command_tx }, command_rx))
    }

    fn restore(&mut self) -> Result<()> {
        let Some(snapshot) = self.snapshots.mark_running()? else {
            return Ok(());
        };
        let was_clean = snapshot.clean_exit;
        let track_id = snapshot
            .position
            .and_then(|p| snapshot.play_order.get(p))
            .and_then(|&i| snapshot.tracks.get(i))
            .map(|t| t.id.clone());

        self.queue = Queue::from_parts(
            snapshot.tracks,
            snapshot.play_order,
            snapshot.position,
            snapshot.shuffle,
            snapshot.repeat,
        );
        self.volume = snapshot.volume.min(100);
        if snapshot.track_position_secs > 0.0 {
            self.resume_position_secs = Some(snapshot.track_position_secs);
        }

        info!(
            tracks = self.queue.len(),
            clean = was_clean,
            "session restored from snapshot"
        );
        if !was_clean {
            warn!("previous run did not exit cleanly");
            self.bus.emit(SessionEvent::ResumedUnclean {
                track_id,
                position_secs: snapshot.track_position_secs,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }

    /// Sender feeding adapter events into the actor loop. Engine reader
    /// and monitor tasks clone this; it also lets a harness drive the
    /// state machine without a live engine process.
    pub fn engine_events(&self) -> mpsc::Sender<EngineEvent> {
        self.engine_event_tx.clone()
    }

    /// The shared load-generation counter, read at event emission time.
    pub fn generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }

    /// Run the actor loop until shutdown.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        let mut engine_event_rx = match self.engine_event_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
                self.engine_event_tx = tx;
                rx
            }
        };
        info!("playback session started");

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown(reply)) => {
                            let result = self.orderly_shutdown().await;
                            let _ = reply.send(result);
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // All handles dropped; exit orderly anyway
                            if let Err(e) = self.orderly_shutdown().await {
                                error!("shutdown on channel close failed: {}", e);
                            }
                            break;
                        }
                    }
                }
                Some(event) = engine_event_rx.recv() => {
                    self.handle_engine_event(event).await;
                }
            }
        }
        info!("playback session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Play(reply) => {
                let _ = reply.send(self.cmd_play().await);
            }
            SessionCommand::PlayAt(index, reply) => {
                let _ = reply.send(self.cmd_play_at(index).await);
            }
            SessionCommand::Pause(reply) => {
                let _ = reply.send(self.cmd_pause().await);
            }
            SessionCommand::Next(reply) => {
                let _ = reply.send(self.cmd_next().await);
            }
            SessionCommand::Previous(reply) => {
                let _ = reply.send(self.cmd_previous().await);
            }
            SessionCommand::Seek(target, reply) => {
                let _ = reply.send(self.cmd_seek(target).await);
            }
            SessionCommand::SetShuffle(enabled, reply) => {
                let _ = reply.send(self.cmd_set_shuffle(enabled));
            }
            SessionCommand::SetRepeat(mode, reply) => {
                let _ = reply.send(self.cmd_set_repeat(mode));
            }
            SessionCommand::Status(reply) => {
                let _ = reply.send(Ok(self.status_payload().await));
            }
            SessionCommand::Now(reply) => {
                let _ = reply.send(Ok(self.now_payload()));
            }
            SessionCommand::QueueList(reply) => {
                let _ = reply.send(Ok(self.queue_payload()));
            }
            SessionCommand::QueueAdd(tracks, reply) => {
                let _ = reply.send(self.cmd_queue_add(tracks));
            }
            SessionCommand::QueueClear(reply) => {
                let _ = reply.send(self.cmd_queue_clear().await);
            }
            SessionCommand::Volume(set_to, reply) => {
                let _ = reply.send(self.cmd_volume(set_to).await);
            }
            SessionCommand::Shutdown(_) => unreachable!("handled in run loop"),
        }
    }

    // ── commands ─────────────────────────────────────────────────────

    async fn cmd_play(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Paused => {
                if let Some(handle) = &self.engine_handle {
                    handle.set_pause(false).await?;
                }
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            PlaybackState::Playing | PlaybackState::Loading | PlaybackState::Advancing => Ok(()),
            PlaybackState::Idle => {
                let track = match self.queue.current().cloned() {
                    Some(track) => track,
                    None => match self.queue.begin().cloned() {
                        Some(track) => track,
                        None => {
                            return Err(Error::InvalidInput("queue is empty".into()));
                        }
                    },
                };
                self.consecutive_failures = 0;
                let resume = self.resume_position_secs.take();
                self.play_from(Some((track, resume))).await;
                Ok(())
            }
        }
    }

    async fn cmd_play_at(&mut self, index: usize) -> Result<()> {
        if self.queue.is_empty() {
            return Err(Error::InvalidInput("queue is empty".into()));
        }
        let Some(track) = self.queue.jump(index).cloned() else {
            return Err(Error::InvalidInput(format!(
                "index {} out of range (queue has {} tracks)",
                index,
                self.queue.len()
            )));
        };
        self.consecutive_failures = 0;
        self.play_from(Some((track, None))).await;
        Ok(())
    }

    async fn cmd_pause(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Playing => {
                if let Some(handle) = &self.engine_handle {
                    handle.set_pause(true).await?;
                }
                self.set_state(PlaybackState::Paused);
                Ok(())
            }
            PlaybackState::Paused | PlaybackState::Idle => Ok(()),
            _ => Err(Error::PlaybackUnavailable(format!(
                "cannot pause while {}",
                self.state
            ))),
        }
    }

    async fn cmd_next(&mut self) -> Result<()> {
        self.consecutive_failures = 0;
        match self.queue.next() {
            Advance::Track(track) => {
                self.play_from(Some((track, None))).await;
            }
            Advance::End => self.stop_playback().await,
        }
        Ok(())
    }

    async fn cmd_previous(&mut self) -> Result<()> {
        // Deep into a track, "previous" means restart it
        if self.state == PlaybackState::Playing
            && self.position_secs > PREVIOUS_RESTART_THRESHOLD_SECS
        {
            if let Some(handle) = &self.engine_handle {
                handle.seek_absolute(0.0).await?;
                self.position_secs = 0.0;
                return Ok(());
            }
        }
        self.consecutive_failures = 0;
        match self.queue.previous().cloned() {
            Some(track) => {
                self.play_from(Some((track, None))).await;
                Ok(())
            }
            None => Err(Error::InvalidInput("queue is empty".into())),
        }
    }

    async fn cmd_seek(&mut self, target: SeekTarget) -> Result<f64> {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            return Err(Error::PlaybackUnavailable("nothing is playing".into()));
        }
        let Some(handle) = &self.engine_handle else {
            return Err(Error::PlaybackUnavailable("engine is not running".into()));
        };
        let resolved = target.resolve(self.position_secs, self.duration_secs);
        handle.seek_absolute(resolved).await?;
        self.position_secs = resolved;
        Ok(resolved)
    }

    fn cmd_set_shuffle(&mut self, enabled: bool) -> Result<()> {
        self.queue.set_shuffle(enabled);
        self.emit_queue_changed();
        self.save_snapshot(false);
        Ok(())
    }

    fn cmd_set_repeat(&mut self, mode: RepeatMode) -> Result<()> {
        self.queue.set_repeat(mode);
        self.emit_queue_changed();
        self.save_snapshot(false);
        Ok(())
    }

    fn cmd_queue_add(&mut self, tracks: Vec<Track>) -> Result<usize> {
        if tracks.is_empty() {
            return Err(Error::InvalidInput("no tracks given".into()));
        }
        let added = tracks.len();
        self.queue.extend(tracks);
        self.emit_queue_changed();
        self.save_snapshot(false);
        Ok(added)
    }

    async fn cmd_queue_clear(&mut self) -> Result<()> {
        self.stop_playback().await;
        self.queue.clear();
        self.emit_queue_changed();
        self.save_snapshot(false);
        Ok(())
    }

    async fn cmd_volume(&mut self, set_to: Option<u8>) -> Result<u8> {
        if let Some(volume) = set_to {
            if volume > 100 {
                return Err(Error::InvalidInput(format!(
                    "volume must be 0-100, got {}",
                    volume
                )));
            }
            self.volume = volume;
            if let Some(handle) = &self.engine_handle {
                handle.set_volume(volume).await?;
            }
            self.bus.emit(SessionEvent::VolumeChanged {
                volume,
                timestamp: chrono::Utc::now(),
            });
            self.save_snapshot(false);
        }
        Ok(self.volume)
    }

    // ── engine events ────────────────────────────────────────────────

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        if event.generation() != self.current_generation {
            debug!(
                event_generation = event.generation(),
                current = self.current_generation,
                "discarding stale engine event"
            );
            return;
        }

        match event {
            EngineEvent::Started { .. } => {
                self.consecutive_failures = 0;
                if let Some(track) = self.queue.current() {
                    self.bus.emit(SessionEvent::TrackStarted {
                        track: track.clone(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                self.set_state(PlaybackState::Playing);
            }
            EngineEvent::Progress {
                position_secs,
                duration_secs,
                ..
            } => {
                self.position_secs = position_secs;
                if duration_secs.is_some() {
                    self.duration_secs = duration_secs;
                }
                if let Some(track) = self.queue.current() {
                    self.bus.emit(SessionEvent::Progress {
                        track_id: track.id.clone(),
                        position_secs,
                        duration_secs: self.duration_secs.unwrap_or(0.0),
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            EngineEvent::PauseChanged { paused, .. } => match (self.state, paused) {
                (PlaybackState::Playing, true) => self.set_state(PlaybackState::Paused),
                (PlaybackState::Paused, false) => self.set_state(PlaybackState::Playing),
                _ => {}
            },
            EngineEvent::Ended { reason, .. } => match reason {
                EndReason::Eof => self.natural_advance().await,
                EndReason::Error => {
                    let next =
                        self.note_failure("engine reported a playback error".into());
                    self.play_from(next).await;
                }
                EndReason::Replaced | EndReason::Stopped => {}
            },
            EngineEvent::Crashed { .. } => self.recover_from_crash().await,
        }
    }

    /// End-of-file advance, guarded against duplicates per generation
    /// and against end signals arriving unbelievably soon after a load.
    async fn natural_advance(&mut self) {
        let elapsed = self
            .load_started
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        if !self.advance_guard.try_claim(self.current_generation, elapsed) {
            debug!(
                generation = self.current_generation,
                "duplicate or premature end-of-file ignored"
            );
            return;
        }

        self.set_state(PlaybackState::Advancing);
        self.save_snapshot(false);
        match self.queue.advance() {
            Advance::Track(track) => self.play_from(Some((track, None))).await,
            Advance::End => {
                info!("queue exhausted");
                self.stop_playback().await;
            }
        }
    }

    /// Record one track failure. Returns the next track to try, or
    /// `None` when the session should stop (failure cap reached or the
    /// queue ran out). The caller feeds the result back into
    /// [`Self::play_from`]; keeping this synchronous breaks the
    /// failure/advance cycle that async recursion would create.
    fn note_failure(&mut self, message: String) -> Option<(Track, Option<f64>)> {
        let track_id = self.queue.current().map(|t| t.id.clone());
        self.consecutive_failures += 1;
        let fatal = self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES;
        warn!(
            failures = self.consecutive_failures,
            fatal, "track failed: {}", message
        );
        self.bus.emit(SessionEvent::PlaybackError {
            track_id,
            message,
            fatal,
            timestamp: chrono::Utc::now(),
        });

        if fatal {
            return None;
        }
        match self.queue.next() {
            Advance::Track(track) => Some((track, None)),
            Advance::End => None,
        }
    }

    /// Try tracks until one loads or the failure policy says stop.
    async fn play_from(&mut self, mut next: Option<(Track, Option<f64>)>) {
        while let Some((track, start)) = next.take() {
            match self.start_track(track, start).await {
                Ok(()) => return,
                Err(e) => {
                    next = self.note_failure(e.to_string());
                }
            }
        }
        self.stop_playback().await;
    }

    /// One respawn per crash; a second crash within the window is fatal.
    async fn recover_from_crash(&mut self) {
        self.engine_handle = None;

        let within_window = self
            .last_crash_recovery
            .map(|t| t.elapsed() < CRASH_FATAL_WINDOW)
            .unwrap_or(false);
        if within_window {
            error!("engine crashed twice within {:?}", CRASH_FATAL_WINDOW);
            self.bus.emit(SessionEvent::PlaybackError {
                track_id: self.queue.current().map(|t| t.id.clone()),
                message: "playback engine is crash-looping".into(),
                fatal: true,
                timestamp: chrono::Utc::now(),
            });
            self.set_state(PlaybackState::Idle);
            return;
        }
        self.last_crash_recovery = Some(Instant::now());

        let Some(track) = self.queue.current().cloned() else {
            self.set_state(PlaybackState::Idle);
            return;
        };
        let resume_at = self.position_secs;
        warn!(
            track = %track.id,
            resume_at,
            "engine crashed, respawning and resuming"
        );
        self.play_from(Some((track, Some(resume_at)))).await;
    }

    // ── playback plumbing ────────────────────────────────────────────

    async fn ensure_engine(&mut self) -> Result<EngineHandle> {
        if let Some(handle) = &self.engine_handle {
            return Ok(handle.clone());
        }
        let mut engine = Engine::spawn(
            &self.config.engine,
            self.engine_event_tx.clone(),
            Arc::clone(&self.generation),
        )
        .await?;
        engine.monitor(self.engine_event_tx.clone(), Arc::clone(&self.generation));

        let handle = engine.handle();
        handle.set_volume(self.volume).await?;
        self.engine_handle = Some(handle.clone());
        Ok(handle)
    }

    /// Load a track into the engine. Allocates a fresh generation first
    /// so everything still in flight for the old load becomes stale.
    async fn start_track(&mut self, track: Track, start_secs: Option<f64>) -> Result<()> {
        self.current_generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.position_secs = start_secs.unwrap_or(0.0);
        self.duration_secs = track.duration_secs.map(f64::from);
        self.set_state(PlaybackState::Loading);

        // Cached audio beats a fresh stream URL
        let quality = self.config.quality;
        let target = match self.cache.get(&track.id, quality).await {
            Ok(Some(path)) => path.to_string_lossy().to_string(),
            Ok(None) | Err(_) => {
                let source = self
                    .resolver
                    .resolve(&track.id, quality)
                    .await
                    .map_err(|e| {
                        Error::Resolve(format!("could not resolve {}: {}", track.id, e))
                    })?;
                self.downloader
                    .spawn_fetch(track.id.clone(), quality, source.clone());
                source.url
            }
        };

        let handle = self.ensure_engine().await?;
        self.load_started = Some(Instant::now());
        handle.load(&target, start_secs).await?;
        handle.set_pause(false).await?;

        // Warm the resolver cache for whatever comes next
        self.prefetch_next();
        self.save_snapshot(false);
        Ok(())
    }

    fn prefetch_next(&self) {
        if self.queue.repeat_mode() == RepeatMode::One {
            return;
        }
        let Some(pos) = self.queue.position() else {
            return;
        };
        let next = self
            .queue
            .play_order()
            .get(pos + 1)
            .and_then(|&i| self.queue.tracks().get(i));
        if let Some(track) = next {
            self.resolver
                .prefetch(track.id.clone(), self.config.quality);
        }
    }

    async fn stop_playback(&mut self) {
        if let Some(handle) = &self.engine_handle {
            let _ = handle.stop().await;
        }
        // Anything the engine still says about the old load is stale now
        self.current_generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.position_secs = 0.0;
        self.duration_secs = None;
        self.set_state(PlaybackState::Idle);
        self.save_snapshot(false);
    }

    async fn orderly_shutdown(&mut self) -> Result<()> {
        info!("orderly shutdown");
        if let Some(handle) = self.engine_handle.take() {
            let _ = handle.quit().await;
        }
        if let Err(e) = self.cache.flush_hits().await {
            warn!("flushing cache hits failed: {}", e);
        }
        self.save_snapshot(true);
        self.bus.emit(SessionEvent::ShutdownComplete {
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    // ── reporting and bookkeeping ────────────────────────────────────

    fn set_state(&mut self, new_state: PlaybackState) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        debug!(%old_state, %new_state, "state change");
        self.bus.emit(SessionEvent::StateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_queue_changed(&self) {
        self.bus.emit(SessionEvent::QueueChanged {
            length: self.queue.len(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn save_snapshot(&self, clean_exit: bool) {
        let snapshot = SessionSnapshot {
            version: 1,
            clean_exit,
            tracks: self.queue.tracks().to_vec(),
            play_order: self.queue.play_order().to_vec(),
            position: self.queue.position(),
            shuffle: self.queue.shuffle_enabled(),
            repeat: self.queue.repeat_mode(),
            volume: self.volume,
            track_position_secs: self.position_secs,
            saved_at: chrono::Utc::now(),
        };
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!("snapshot save failed: {}", e);
        }
    }

    async fn status_payload(&self) -> StatusPayload {
        let cache = self.cache.stats().await;
        StatusPayload {
            state: self.state,
            track: self.queue.current().cloned(),
            position_secs: self.position_secs,
            duration_secs: self.duration_secs,
            volume: self.volume,
            queue_length: self.queue.len(),
            queue_position: self.queue.position(),
            shuffle: self.queue.shuffle_enabled(),
            repeat: self.queue.repeat_mode(),
            cache_entries: cache.entries,
            cache_bytes: cache.total_bytes,
            cache_budget_bytes: cache.budget_bytes,
        }
    }

    fn now_payload(&self) -> Option<NowPayload> {
        let track = self.queue.current()?.clone();
        Some(NowPayload {
            track,
            state: self.state,
            position_secs: self.position_secs,
            duration_secs: self.duration_secs,
        })
    }

    fn queue_payload(&self) -> QueuePayload {
        let current = self.queue.position();
        QueuePayload {
            items: self
                .queue
                .ordered()
                .enumerate()
                .map(|(index, track)| QueueItem {
                    index,
                    track: track.clone(),
                    current: Some(index) == current,
                })
                .collect(),
            shuffle: self.queue.shuffle_enabled(),
            repeat: self.queue.repeat_mode(),
        }
    }
}
