//! Output Buffer
//!
//! Append-only, offset-addressed log of a session's output. The process
//! runner is the only writer; any number of readers follow it through
//! [`BufferReader`], which replays from an offset and then keeps yielding
//! chunks as they are appended.
//!
//! Appends publish a [`Watermark`] through a `tokio::sync::watch` channel
//! while still holding the write lock, so a reader that sees a watermark
//! always finds the chunks it announces. Readers never block the writer: a
//! slow reader only falls behind its own cursor.

use crate::chunk::{ChunkKind, OutputChunk};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Default maximum number of chunks handed to a reader at once
pub const DEFAULT_MAX_BATCH: usize = 256;

/// Published buffer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Watermark {
    /// Number of chunks in the buffer (the next offset to be assigned)
    pub len: u64,
    /// Whether the terminal chunk has been appended
    pub sealed: bool,
}

/// How a session's output ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Exit code, absent when the process never started
    pub exit_code: Option<i32>,
    /// When the terminal chunk was appended
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BufferState {
    chunks: Vec<OutputChunk>,
    completion: Option<Completion>,
}

/// Append-only output log for one session.
#[derive(Debug)]
pub struct OutputBuffer {
    state: RwLock<BufferState>,
    watermark: watch::Sender<Watermark>,
}

impl OutputBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        let (watermark, _) = watch::channel(Watermark::default());
        Self {
            state: RwLock::new(BufferState::default()),
            watermark,
        }
    }

    /// Append a chunk and return its offset.
    ///
    /// Appending an exit or error chunk seals the buffer; later appends fail
    /// with [`Error::BufferSealed`].
    pub async fn append(&self, kind: ChunkKind) -> Result<u64> {
        let mut state = self.state.write().await;
        if state.completion.is_some() {
            return Err(Error::BufferSealed);
        }

        let offset = state.chunks.len() as u64;
        let sealed = kind.is_terminal();
        if sealed {
            state.completion = Some(Completion {
                exit_code: kind.exit_code(),
                completed_at: Utc::now(),
            });
        }
        state.chunks.push(OutputChunk { offset, kind });

        self.watermark.send_replace(Watermark {
            len: offset + 1,
            sealed,
        });
        Ok(offset)
    }

    /// Copy up to `limit` chunks starting at `offset`.
    pub async fn snapshot_from(&self, offset: u64, limit: usize) -> Vec<OutputChunk> {
        let state = self.state.read().await;
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(state.chunks.len());
        let end = start.saturating_add(limit).min(state.chunks.len());
        state.chunks[start..end].to_vec()
    }

    /// Follow the buffer from `offset`: replay what exists, then wait for
    /// new chunks until the buffer is sealed.
    #[must_use]
    pub fn read_from(self: &Arc<Self>, offset: u64) -> BufferReader {
        BufferReader {
            buffer: Arc::clone(self),
            rx: self.watermark.subscribe(),
            cursor: offset,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    /// Current watermark.
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        *self.watermark.borrow()
    }

    /// Number of chunks appended so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.watermark().len
    }

    /// Whether no chunk has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the terminal chunk has been appended.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.watermark().sealed
    }

    /// Completion record, once sealed.
    pub async fn completion(&self) -> Option<Completion> {
        self.state.read().await.completion
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor that follows an [`OutputBuffer`].
#[derive(Debug)]
pub struct BufferReader {
    buffer: Arc<OutputBuffer>,
    rx: watch::Receiver<Watermark>,
    cursor: u64,
    max_batch: usize,
}

impl BufferReader {
    /// Limit how many chunks one call to [`next_batch`](Self::next_batch) returns.
    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Offset of the next chunk this reader will return.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Wait for the next run of chunks at the cursor.
    ///
    /// Returns `None` once every chunk of a sealed buffer has been returned.
    /// Cancel safe: the cursor only advances when a batch is returned.
    pub async fn next_batch(&mut self) -> Option<Vec<OutputChunk>> {
        loop {
            let mark = *self.rx.borrow_and_update();
            if self.cursor < mark.len {
                let batch = self.buffer.snapshot_from(self.cursor, self.max_batch).await;
                if let Some(last) = batch.last() {
                    self.cursor = last.offset + 1;
                    return Some(batch);
                }
            }
            if mark.sealed {
                return None;
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}
