//! Control socket wire protocol
//!
//! One request per connection: the client writes a single JSON object
//! and half-closes; the server replies with a single JSON object and
//! closes. Shared by the server and the `quaverctl` client so both
//! sides agree on shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Report payload shapes are owned by the session; they are part of the
// wire surface, so clients can import them from here.
pub use crate::session::{NowPayload, QueueItem, QueuePayload, StatusPayload};

/// Hard cap on request size; larger requests are a protocol error.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Fixed command whitelist. Anything else is rejected before touching
/// session state.
pub const COMMAND_WHITELIST: &[&str] = &[
    "play",
    "play-at",
    "pause",
    "next",
    "previous",
    "seek",
    "shuffle",
    "repeat",
    "status",
    "now",
    "queue",
    "queue-add",
    "queue-clear",
    "volume",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Value::Null,
        }
    }

    pub fn with_args(command: impl Into<String>, args: Value) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok { payload: None }
    }

    pub fn with_payload<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Response::Ok {
                payload: Some(value),
            },
            Err(e) => Response::Error {
                code: "internal".to_string(),
                message: format!("payload serialization failed: {}", e),
            },
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// `volume` reply body (also returned when setting)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumePayload {
    pub volume: u8,
}
