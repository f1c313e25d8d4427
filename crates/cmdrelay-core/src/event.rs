//! Wire events pushed to clients on the run stream.
//!
//! Each event is serialized as one JSON object and sent as a single
//! `data: <json>` line. The shapes are fixed:
//!
//! ```text
//! { "type": "session", "data": "<session id>" }
//! { "type": "stdout",  "data": "<text>" }
//! { "type": "stderr",  "data": "<text>" }
//! { "type": "exit",    "data": "Process exited", "code": 0 }
//! { "type": "error",   "data": "<message>" }
//! ```

use crate::chunk::{ChunkKind, OutputChunk};
use crate::session::SessionId;
use serde::Serialize;

/// Message carried by every exit event.
pub const EXIT_MESSAGE: &str = "Process exited";

/// Event sent to a client over the run stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Announces the identifier of a newly created session
    Session {
        /// Session identifier
        data: String,
    },
    /// Standard output text
    Stdout {
        /// Output text
        data: String,
    },
    /// Standard error text
    Stderr {
        /// Output text
        data: String,
    },
    /// Process exit
    Exit {
        /// Always [`EXIT_MESSAGE`]
        data: String,
        /// Exit code
        code: i32,
    },
    /// Spawn failure
    Error {
        /// Error description
        data: String,
    },
}

impl StreamEvent {
    /// Session announcement event.
    #[must_use]
    pub fn session(id: &SessionId) -> Self {
        Self::Session {
            data: id.to_string(),
        }
    }

    /// Serialize to the JSON payload of a `data:` line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Whether the stream ends after this event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exit { .. } | Self::Error { .. })
    }
}

impl From<&OutputChunk> for StreamEvent {
    fn from(chunk: &OutputChunk) -> Self {
        match &chunk.kind {
            ChunkKind::Stdout(text) => Self::Stdout { data: text.clone() },
            ChunkKind::Stderr(text) => Self::Stderr { data: text.clone() },
            ChunkKind::Exit(code) => Self::Exit {
                data: EXIT_MESSAGE.to_string(),
                code: *code,
            },
            ChunkKind::Error(message) => Self::Error {
                data: message.clone(),
            },
        }
    }
}
