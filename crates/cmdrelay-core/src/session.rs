//! Sessions
//!
//! A session is the tracked lifetime of one spawned command: its identifier,
//! the command text, its output buffer and the connections currently
//! following that buffer. Sessions are only created and destroyed by the
//! [`SessionRegistry`](crate::registry::SessionRegistry).

use crate::buffer::OutputBuffer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Opaque, unguessable session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Summary view of a session (for the runs listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session ID
    pub session_id: SessionId,
    /// Command text as submitted
    pub command: String,
    /// Creation time in epoch milliseconds
    pub start_time: i64,
    /// Whether the terminal chunk has been written
    pub is_complete: bool,
    /// Exit code, only when complete and the process actually ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Detailed view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    /// Summary fields
    #[serde(flatten)]
    pub summary: SessionSummary,
    /// Connections currently following the output
    pub subscribers: usize,
    /// Number of chunks in the output buffer
    pub chunks: u64,
}

/// Bookkeeping for one attached connection.
#[derive(Debug)]
struct SubscriberEntry {
    attached_at: DateTime<Utc>,
    cursor: Arc<AtomicU64>,
}

/// A single command session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    command: String,
    started_at: DateTime<Utc>,
    seq: u64,
    buffer: Arc<OutputBuffer>,
    subscribers: DashMap<u64, SubscriberEntry>,
    next_subscriber: AtomicU64,
    runner_started: AtomicBool,
}

impl Session {
    pub(crate) fn new(id: SessionId, command: impl Into<String>, seq: u64) -> Self {
        Self {
            id,
            command: command.into(),
            started_at: Utc::now(),
            seq,
            buffer: Arc::new(OutputBuffer::new()),
            subscribers: DashMap::new(),
            next_subscriber: AtomicU64::new(0),
            runner_started: AtomicBool::new(false),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Command text.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Creation timestamp.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Creation order within the registry, used to break timestamp ties.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The session's output buffer.
    #[must_use]
    pub fn buffer(&self) -> &Arc<OutputBuffer> {
        &self.buffer
    }

    /// Whether the process has exited or failed to start.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.buffer.is_sealed()
    }

    /// Exit code, once the process has exited.
    pub async fn exit_code(&self) -> Option<i32> {
        self.buffer.completion().await.and_then(|c| c.exit_code)
    }

    /// Claim the right to run this session's process. Only the first call
    /// returns `true`.
    pub(crate) fn mark_runner_started(&self) -> bool {
        self.runner_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Register a live subscriber starting at `cursor`. The subscriber is
    /// removed when the returned guard is dropped.
    #[must_use]
    pub fn attach(self: &Arc<Self>, cursor: u64) -> SubscriberGuard {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let cursor = Arc::new(AtomicU64::new(cursor));
        self.subscribers.insert(
            id,
            SubscriberEntry {
                attached_at: Utc::now(),
                cursor: Arc::clone(&cursor),
            },
        );
        debug!(
            session_id = %self.id,
            subscriber = id,
            subscribers = self.subscribers.len(),
            "Subscriber attached"
        );
        SubscriberGuard {
            session: Arc::clone(self),
            id,
            cursor,
        }
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Next expected offset of every attached subscriber, oldest first.
    #[must_use]
    pub fn subscriber_cursors(&self) -> Vec<u64> {
        let mut entries: Vec<(DateTime<Utc>, u64, u64)> = self
            .subscribers
            .iter()
            .map(|e| (e.attached_at, *e.key(), e.cursor.load(Ordering::SeqCst)))
            .collect();
        entries.sort_by_key(|(at, id, _)| (*at, *id));
        entries.into_iter().map(|(_, _, cursor)| cursor).collect()
    }

    /// Summary view.
    pub async fn summary(&self) -> SessionSummary {
        let completion = self.buffer.completion().await;
        SessionSummary {
            session_id: self.id.clone(),
            command: self.command.clone(),
            start_time: self.started_at.timestamp_millis(),
            is_complete: completion.is_some(),
            exit_code: completion.and_then(|c| c.exit_code),
        }
    }

    /// Detailed view.
    pub async fn detail(&self) -> SessionDetail {
        SessionDetail {
            summary: self.summary().await,
            subscribers: self.subscriber_count(),
            chunks: self.buffer.len(),
        }
    }
}

/// Live subscription handle; detaches the subscriber on drop.
#[derive(Debug)]
pub struct SubscriberGuard {
    session: Arc<Session>,
    id: u64,
    cursor: Arc<AtomicU64>,
}

impl SubscriberGuard {
    /// Record the next offset this subscriber expects.
    pub fn advance(&self, next_offset: u64) {
        self.cursor.store(next_offset, Ordering::SeqCst);
    }

    /// Next offset this subscriber expects.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.session.subscribers.remove(&self.id);
        debug!(
            session_id = %self.session.id,
            subscriber = self.id,
            cursor = self.cursor(),
            subscribers = self.session.subscribers.len(),
            "Subscriber detached"
        );
    }
}
