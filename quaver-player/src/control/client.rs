//! One-shot control client
//!
//! Mirrors the server's framing: connect, write one JSON request,
//! half-close, read the single JSON response.

use crate::control::protocol::{Request, Response};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and wait for the reply. An unreachable socket
    /// means no daemon is running.
    pub async fn send(&self, request: &Request) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|_| {
            Error::PlaybackUnavailable(format!(
                "no running session (socket {} unreachable)",
                self.socket_path.display()
            ))
        })?;

        let body = serde_json::to_vec(request)?;
        stream.write_all(&body).await?;
        // Half-close signals end-of-request to the server
        stream.shutdown().await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        serde_json::from_slice(&reply)
            .map_err(|e| Error::Protocol(format!("malformed response: {}", e)))
    }
}
