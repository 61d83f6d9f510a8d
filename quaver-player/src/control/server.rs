//! Control socket server
//!
//! One JSON request per connection: read to EOF (capped), validate
//! against the whitelist, dispatch to the session, write one JSON
//! response. Rejected requests never reach the session, so a malformed
//! or unknown command cannot perturb playback state.

use crate::control::protocol::{
    NowPayload, QueuePayload, Request, Response, StatusPayload, VolumePayload,
    COMMAND_WHITELIST, MAX_REQUEST_BYTES,
};
use crate::error::{Error, Result};
use crate::session::SessionHandle;
use quaver_common::model::{RepeatMode, Track};
use quaver_common::time::parse_seek_target;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Concurrent connection bound. The protocol is one short request per
/// connection; anything piling up beyond this is a misbehaving client.
const MAX_CONNECTIONS: usize = 4;

/// A client that connects but never finishes writing would otherwise
/// hold a connection permit forever.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
    session: SessionHandle,
}

impl ControlServer {
    /// Create the runtime directory owner-only, bind the socket, and
    /// tighten its mode before any accept.
    pub fn bind(socket_path: &Path, session: SessionHandle) -> Result<Self> {
        let runtime_dir = socket_path
            .parent()
            .ok_or_else(|| Error::Protocol("socket path has no parent directory".into()))?;
        std::fs::create_dir_all(runtime_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let socket_path = socket_path.to_path_buf();
        if socket_path.exists() {
            // Stale socket from a dead run; a live one would also fail
            // the bind below, which is the correct outcome.
            let _ = std::fs::remove_file(&socket_path);
        }

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| Error::Protocol(format!("control socket bind failed: {}", e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(socket = %socket_path.display(), "control surface listening");
        Ok(Self {
            listener,
            socket_path,
            session,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept loop. Runs until the task is aborted at shutdown.
    pub async fn run(self) {
        let permits = Arc::new(Semaphore::new(MAX_CONNECTIONS));
        loop {
            let (stream, _addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("control accept failed: {}", e);
                    continue;
                }
            };
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let session = self.session.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_connection(stream, session).await {
                    debug!("control connection error: {}", e);
                }
            });
        }
    }
}

async fn handle_connection(mut stream: UnixStream, session: SessionHandle) -> Result<()> {
    let request = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(&mut stream))
        .await
        .unwrap_or_else(|_| {
            Err(Error::Protocol(format!(
                "request not completed within {:?}",
                REQUEST_READ_TIMEOUT
            )))
        });
    let response = match request {
        Ok(request) => dispatch(&session, request).await,
        Err(e) => Response::error(e.code(), e.to_string()),
    };

    let mut body = serde_json::to_vec(&response)?;
    body.push(b'\n');
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read the request body until the client half-closes, rejecting bodies
/// over the size cap without buffering them.
async fn read_request(stream: &mut UnixStream) -> Result<Request> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if buf.len() + n > MAX_REQUEST_BYTES {
            return Err(Error::Protocol(format!(
                "request exceeds {} bytes",
                MAX_REQUEST_BYTES
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    serde_json::from_slice(&buf)
        .map_err(|e| Error::Protocol(format!("malformed request: {}", e)))
}

/// Validate and route one request. Whitelist and argument validation
/// happen here; only well-formed commands reach the session.
pub async fn dispatch(session: &SessionHandle, request: Request) -> Response {
    if !COMMAND_WHITELIST.contains(&request.command.as_str()) {
        // Outside the vocabulary entirely: a protocol violation, not a
        // bad argument to a known command.
        return Response::error("protocol", format!("unknown command: {}", request.command));
    }

    let result: Result<Response> = match request.command.as_str() {
        "play" => session.play().await.map(|_| Response::ok()),
        "play-at" => match index_arg(&request.args) {
            Ok(index) => session.play_at(index).await.map(|_| Response::ok()),
            Err(e) => Err(e),
        },
        "shuffle" => match bool_arg(&request.args, "enabled") {
            Ok(enabled) => session.set_shuffle(enabled).await.map(|_| Response::ok()),
            Err(e) => Err(e),
        },
        "repeat" => match repeat_arg(&request.args) {
            Ok(mode) => session.set_repeat(mode).await.map(|_| Response::ok()),
            Err(e) => Err(e),
        },
        "pause" => session.pause().await.map(|_| Response::ok()),
        "next" => session.next().await.map(|_| Response::ok()),
        "previous" => session.previous().await.map(|_| Response::ok()),
        "seek" => match seek_target_arg(&request.args) {
            Ok(target) => session.seek(target).await.map(|position| {
                Response::with_payload(&serde_json::json!({ "position_secs": position }))
            }),
            Err(e) => Err(e),
        },
        "status" => session
            .status()
            .await
            .map(|payload: StatusPayload| Response::with_payload(&payload)),
        "now" => session.now().await.map(|now: Option<NowPayload>| match now {
            Some(payload) => Response::with_payload(&payload),
            None => Response::ok(),
        }),
        "queue" => session
            .queue_list()
            .await
            .map(|payload: QueuePayload| Response::with_payload(&payload)),
        "queue-add" => match tracks_arg(&request.args) {
            Ok(tracks) => session.queue_add(tracks).await.map(|added| {
                Response::with_payload(&serde_json::json!({ "added": added }))
            }),
            Err(e) => Err(e),
        },
        "queue-clear" => session.queue_clear().await.map(|_| Response::ok()),
        "volume" => match volume_arg(&request.args) {
            Ok(set_to) => session
                .volume(set_to)
                .await
                .map(|volume| Response::with_payload(&VolumePayload { volume })),
            Err(e) => Err(e),
        },
        // Unreachable: whitelist checked above
        other => Err(Error::Protocol(format!("unrouted command: {}", other))),
    };

    match result {
        Ok(response) => response,
        Err(e) => Response::error(e.code(), e.to_string()),
    }
}

fn seek_target_arg(args: &Value) -> Result<quaver_common::time::SeekTarget> {
    let raw = match args {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("target")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("seek requires a target".into()))?,
        _ => return Err(Error::InvalidInput("seek requires a target".into())),
    };
    parse_seek_target(raw).map_err(Error::from)
}

fn index_arg(args: &Value) -> Result<usize> {
    let raw = match args {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => map.get("index").and_then(Value::as_u64),
        _ => None,
    };
    raw.map(|v| v as usize)
        .ok_or_else(|| Error::InvalidInput("play-at requires a non-negative index".into()))
}

fn bool_arg(args: &Value, key: &str) -> Result<bool> {
    match args {
        Value::Bool(b) => Ok(*b),
        Value::Object(map) => match map.get(key) {
            Some(Value::Bool(b)) => Ok(*b),
            _ => Err(Error::InvalidInput(format!("{} must be a boolean", key))),
        },
        _ => Err(Error::InvalidInput(format!("{} must be a boolean", key))),
    }
}

fn repeat_arg(args: &Value) -> Result<RepeatMode> {
    let raw = match args {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("mode")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("repeat requires a mode".into()))?,
        _ => return Err(Error::InvalidInput("repeat requires a mode".into())),
    };
    match raw {
        "off" => Ok(RepeatMode::Off),
        "all" => Ok(RepeatMode::All),
        "one" => Ok(RepeatMode::One),
        other => Err(Error::InvalidInput(format!(
            "repeat mode must be off, all, or one, got {}",
            other
        ))),
    }
}

fn tracks_arg(args: &Value) -> Result<Vec<Track>> {
    let list = match args {
        Value::Array(list) => list.clone(),
        Value::Object(map) => match map.get("tracks") {
            Some(Value::Array(list)) => list.clone(),
            _ => return Err(Error::InvalidInput("queue-add requires tracks".into())),
        },
        _ => return Err(Error::InvalidInput("queue-add requires tracks".into())),
    };
    let tracks: Vec<Track> = serde_json::from_value(Value::Array(list))
        .map_err(|e| Error::InvalidInput(format!("bad track object: {}", e)))?;
    if tracks.is_empty() {
        return Err(Error::InvalidInput("queue-add requires tracks".into()));
    }
    Ok(tracks)
}

fn volume_arg(args: &Value) -> Result<Option<u8>> {
    match args {
        Value::Null => Ok(None),
        Value::Number(n) => parse_volume(n.as_u64()),
        Value::Object(map) => match map.get("volume") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => parse_volume(n.as_u64()),
            Some(_) => Err(Error::InvalidInput("volume must be a number".into())),
        },
        _ => Err(Error::InvalidInput("volume must be a number".into())),
    }
}

fn parse_volume(raw: Option<u64>) -> Result<Option<u8>> {
    match raw {
        Some(v) if v <= 100 => Ok(Some(v as u8)),
        Some(v) => Err(Error::InvalidInput(format!(
            "volume must be 0-100, got {}",
            v
        ))),
        None => Err(Error::InvalidInput("volume must be a number".into())),
    }
}
