//! Engine process spawning and JSON IPC connection
//!
//! The playback engine is an external process (mpv or anything speaking
//! its JSON IPC dialect) started idle with a private unix socket. One
//! reader task per connection translates unsolicited events into
//! [`EngineEvent`]s; commands are one JSON line each over the same
//! socket.

use crate::error::{Error, Result};
use crate::player::{EndReason, EngineEvent};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Property observation ids registered on every fresh connection
const OBS_TIME_POS: u64 = 1;
const OBS_DURATION: u64 = 2;
const OBS_PAUSE: u64 = 3;

/// Forward a Progress event only when the position moved at least this far
const PROGRESS_STEP_SECS: f64 = 0.5;

/// Socket connect retry schedule after spawn
const CONNECT_ATTEMPTS: u32 = 30;
const CONNECT_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine binary name or path
    pub binary: String,
    /// IPC socket path, inside the owner-only runtime directory
    pub socket_path: PathBuf,
    /// Gapless transitions between consecutive loads
    pub gapless: bool,
}

/// A running engine process plus its IPC connection.
///
/// [`Engine::monitor`] hands the child to its exit-watcher task; an
/// orderly shutdown goes through [`EngineHandle::quit`] first so the
/// watcher does not report a crash.
pub struct Engine {
    child: Option<Child>,
    handle: EngineHandle,
}

/// Cloneable command surface for a live engine connection.
#[derive(Clone)]
pub struct EngineHandle {
    writer: Arc<Mutex<tokio::net::unix::OwnedWriteHalf>>,
    request_id: Arc<AtomicU64>,
    shutting_down: Arc<AtomicBool>,
}

impl Engine {
    /// Spawn the engine process and connect to its IPC socket.
    ///
    /// `generation` is read at event-emission time so that events raced
    /// against a concurrent load carry the generation they belong to.
    pub async fn spawn(
        config: &EngineConfig,
        event_tx: mpsc::Sender<EngineEvent>,
        generation: Arc<AtomicU64>,
    ) -> Result<Self> {
        // A stale socket from a crashed run would make the engine fail to bind
        if config.socket_path.exists() {
            let _ = std::fs::remove_file(&config.socket_path);
        }

        let mut child = Command::new(&config.binary)
            .arg("--idle=yes")
            .arg("--no-video")
            .arg("--no-terminal")
            .arg("--really-quiet")
            .arg(if config.gapless {
                "--gapless-audio=yes"
            } else {
                "--gapless-audio=no"
            })
            .arg(format!(
                "--input-ipc-server={}",
                config.socket_path.display()
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Engine(format!("failed to spawn {}: {}", config.binary, e)))?;

        let stream = connect_with_retry(&config.socket_path, &mut child).await?;
        let (read_half, write_half) = stream.into_split();

        let handle = EngineHandle {
            writer: Arc::new(Mutex::new(write_half)),
            request_id: Arc::new(AtomicU64::new(1)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        };

        handle.observe_properties().await?;

        // Reader task: translate engine events until the socket closes
        let reader_tx = event_tx.clone();
        let reader_generation = Arc::clone(&generation);
        tokio::spawn(async move {
            run_reader(read_half, reader_tx, reader_generation).await;
        });

        info!(
            socket = %config.socket_path.display(),
            "engine process started"
        );

        Ok(Self {
            child: Some(child),
            handle,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Spawn the exit monitor. Consumes the child; an exit that was not
    /// preceded by [`EngineHandle::quit`] is reported as a crash tagged
    /// with the generation current at exit time.
    pub fn monitor(
        &mut self,
        event_tx: mpsc::Sender<EngineEvent>,
        generation: Arc<AtomicU64>,
    ) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let shutting_down = Arc::clone(&self.handle.shutting_down);
        tokio::spawn(async move {
            let status = child.wait().await;
            if shutting_down.load(Ordering::Acquire) {
                debug!("engine exited after quit: {:?}", status);
                return;
            }
            warn!("engine process exited unexpectedly: {:?}", status);
            let _ = event_tx
                .send(EngineEvent::Crashed {
                    generation: generation.load(Ordering::Acquire),
                })
                .await;
        });
    }
}

impl EngineHandle {
    async fn send(&self, command: Value) -> Result<()> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({ "command": command, "request_id": id });
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| Error::Engine(format!("IPC write failed: {}", e)))?;
        Ok(())
    }

    async fn observe_properties(&self) -> Result<()> {
        self.send(json!(["observe_property", OBS_TIME_POS, "time-pos"]))
            .await?;
        self.send(json!(["observe_property", OBS_DURATION, "duration"]))
            .await?;
        self.send(json!(["observe_property", OBS_PAUSE, "pause"]))
            .await?;
        Ok(())
    }

    /// Load a URL, replacing whatever is playing. `start_secs` resumes
    /// mid-track (crash recovery, session restore).
    pub async fn load(&self, url: &str, start_secs: Option<f64>) -> Result<()> {
        match start_secs {
            Some(start) if start > 0.0 => {
                self.send(json!([
                    "loadfile",
                    url,
                    "replace",
                    format!("start={:.3}", start)
                ]))
                .await
            }
            _ => self.send(json!(["loadfile", url, "replace"])).await,
        }
    }

    pub async fn set_pause(&self, paused: bool) -> Result<()> {
        self.send(json!(["set_property", "pause", paused])).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(json!(["stop"])).await
    }

    pub async fn seek_absolute(&self, seconds: f64) -> Result<()> {
        self.send(json!(["seek", seconds, "absolute"])).await
    }

    /// Volume on the 0-100 user scale
    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        self.send(json!(["set_property", "volume", volume.min(100)]))
            .await
    }

    /// Orderly shutdown. Marks the connection as closing first so the
    /// exit monitor does not report a crash.
    pub async fn quit(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::Release);
        self.send(json!(["quit"])).await
    }
}

async fn connect_with_retry(path: &std::path::Path, child: &mut Child) -> Result<UnixStream> {
    for _ in 0..CONNECT_ATTEMPTS {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| Error::Engine(format!("engine wait failed: {}", e)))?
        {
            return Err(Error::Engine(format!(
                "engine exited during startup: {}",
                status
            )));
        }
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(_) => tokio::time::sleep(CONNECT_RETRY).await,
        }
    }
    Err(Error::Engine(format!(
        "engine IPC socket never appeared at {}",
        path.display()
    )))
}

/// Reader loop: one JSON object per line from the engine.
async fn run_reader(
    read_half: tokio::net::unix::OwnedReadHalf,
    event_tx: mpsc::Sender<EngineEvent>,
    generation: Arc<AtomicU64>,
) {
    let mut lines = BufReader::new(read_half).lines();
    // Reader-local observed state, used to assemble Progress events and
    // throttle their rate.
    let mut last_duration: Option<f64> = None;
    let mut last_forwarded_pos: Option<f64> = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("engine IPC socket closed");
                break;
            }
            Err(e) => {
                debug!("engine IPC read error: {}", e);
                break;
            }
        };

        let raw: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let gen_now = generation.load(Ordering::Acquire);
        let event = match raw.get("event").and_then(Value::as_str) {
            Some("property-change") => match raw.get("id").and_then(Value::as_u64) {
                Some(OBS_TIME_POS) => {
                    let Some(pos) = raw.get("data").and_then(Value::as_f64) else {
                        continue;
                    };
                    let moved = last_forwarded_pos
                        .map(|p| (pos - p).abs() >= PROGRESS_STEP_SECS)
                        .unwrap_or(true);
                    if !moved {
                        continue;
                    }
                    last_forwarded_pos = Some(pos);
                    EngineEvent::Progress {
                        generation: gen_now,
                        position_secs: pos,
                        duration_secs: last_duration,
                    }
                }
                Some(OBS_DURATION) => {
                    last_duration = raw.get("data").and_then(Value::as_f64);
                    continue;
                }
                Some(OBS_PAUSE) => EngineEvent::PauseChanged {
                    generation: gen_now,
                    paused: raw.get("data").and_then(Value::as_bool).unwrap_or(false),
                },
                _ => continue,
            },
            Some("file-loaded") => {
                last_forwarded_pos = None;
                last_duration = None;
                EngineEvent::Started { generation: gen_now }
            }
            Some("end-file") => {
                let reason = match raw.get("reason").and_then(Value::as_str) {
                    Some("eof") => EndReason::Eof,
                    Some("redirect") => EndReason::Replaced,
                    Some("stop") | Some("quit") => EndReason::Stopped,
                    _ => EndReason::Error,
                };
                last_forwarded_pos = None;
                EngineEvent::Ended {
                    generation: gen_now,
                    reason,
                }
            }
            _ => continue,
        };

        if event_tx.send(event).await.is_err() {
            break;
        }
    }
}
