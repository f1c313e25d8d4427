//! Stream Multiplexer
//!
//! Turns a session's buffer into a per-connection event stream: replay from
//! an offset, then follow the live tail until the exit or error chunk.
//! Each [`Subscription`] owns its own cursor and pulls from the shared
//! buffer at the pace of its connection, so a slow client only delays
//! itself; the process runner never waits on a subscriber.
//!
//! While attached, a subscription yields [`StreamItem::KeepAlive`] whenever
//! no output has been delivered for the keep-alive interval.

use crate::buffer::{BufferReader, DEFAULT_MAX_BATCH};
use crate::chunk::OutputChunk;
use crate::event::StreamEvent;
use crate::session::{Session, SessionId, SubscriberGuard};
use futures::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default idle interval before a keep-alive is emitted
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// One item of a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Session data
    Event(StreamEvent),
    /// Idle signal with no session data
    KeepAlive,
}

/// Multiplexer configuration
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Idle interval before a keep-alive
    pub keep_alive: Duration,
    /// Maximum chunks pulled from the buffer at once
    pub max_batch: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

/// Creates subscriptions on sessions.
#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    config: MultiplexerConfig,
    shutdown: CancellationToken,
}

impl StreamMultiplexer {
    /// Create a multiplexer; every subscription ends when `shutdown` fires.
    #[must_use]
    pub fn new(config: MultiplexerConfig, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Multiplexer configuration.
    #[must_use]
    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    /// Attach a new subscriber to `session`, replaying from `from_offset`.
    ///
    /// With `announce`, the first item is the `session` event carrying the
    /// session identifier.
    #[must_use]
    pub fn attach(&self, session: &Arc<Session>, from_offset: u64, announce: bool) -> Subscription {
        let reader = session
            .buffer()
            .read_from(from_offset)
            .with_max_batch(self.config.max_batch);
        let guard = session.attach(from_offset);

        Subscription {
            session_id: session.id().clone(),
            announce: announce.then(|| StreamEvent::session(session.id())),
            reader,
            guard,
            pending: VecDeque::new(),
            keep_alive: self.config.keep_alive,
            shutdown: self.shutdown.clone(),
            last_offset: from_offset.checked_sub(1),
            done: false,
        }
    }
}

enum Wake {
    Shutdown,
    Batch(Option<Vec<OutputChunk>>),
    Idle,
}

/// A live connection's view of a session.
///
/// Dropping the subscription detaches the subscriber; nothing else about
/// the session changes.
#[derive(Debug)]
pub struct Subscription {
    session_id: SessionId,
    announce: Option<StreamEvent>,
    reader: BufferReader,
    guard: SubscriberGuard,
    pending: VecDeque<OutputChunk>,
    keep_alive: Duration,
    shutdown: CancellationToken,
    last_offset: Option<u64>,
    done: bool,
}

impl Subscription {
    /// Session being followed.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Offset of the next chunk this subscription will deliver.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.guard.cursor()
    }

    /// Next item, or `None` once the terminal chunk has been delivered, the
    /// buffer has nothing more, or the service is shutting down.
    pub async fn next(&mut self) -> Option<StreamItem> {
        if self.done {
            return None;
        }
        if let Some(event) = self.announce.take() {
            return Some(StreamItem::Event(event));
        }

        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(self.deliver(chunk));
            }

            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                result = tokio::time::timeout(self.keep_alive, self.reader.next_batch()) => {
                    match result {
                        Ok(batch) => Wake::Batch(batch),
                        Err(_) => Wake::Idle,
                    }
                }
            };

            match wake {
                Wake::Shutdown => {
                    debug!(session_id = %self.session_id, "Subscription closed by shutdown");
                    self.done = true;
                    return None;
                }
                Wake::Idle => return Some(StreamItem::KeepAlive),
                Wake::Batch(None) => {
                    self.done = true;
                    return None;
                }
                Wake::Batch(Some(batch)) => self.pending.extend(batch),
            }
        }
    }

    fn deliver(&mut self, chunk: OutputChunk) -> StreamItem {
        debug_assert!(
            self.last_offset.map_or(chunk.offset == 0, |last| chunk.offset == last + 1),
            "subscription skipped or repeated an offset"
        );
        self.last_offset = Some(chunk.offset);
        self.guard.advance(chunk.offset + 1);
        if chunk.is_terminal() {
            self.done = true;
        }
        StreamItem::Event(StreamEvent::from(&chunk))
    }

    /// Adapt into a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = StreamItem> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|item| (item, sub))
        })
    }
}
