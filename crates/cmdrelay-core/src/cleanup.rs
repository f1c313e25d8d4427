//! Cleanup Scheduler
//!
//! One-shot retention timers for completed sessions. A timer is armed once
//! a session's output is sealed and fires after the retention window,
//! running the eviction it was armed with. Every timer hangs off a single
//! root [`CancellationToken`], so shutdown cancels all of them at once and
//! [`CleanupScheduler::shutdown`] waits until they are gone.

use crate::session::SessionId;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default retention window after completion (5 minutes)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct CleanupTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the retention timers of all completed sessions.
#[derive(Debug)]
pub struct CleanupScheduler {
    retention: Duration,
    root: CancellationToken,
    timers: Arc<DashMap<SessionId, CleanupTimer>>,
}

impl CleanupScheduler {
    /// Create a scheduler whose timers are cancelled with `root`.
    #[must_use]
    pub fn new(retention: Duration, root: CancellationToken) -> Self {
        Self {
            retention,
            root,
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Retention window.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Arm the retention timer for `session_id`.
    ///
    /// `on_expire` runs when the window elapses without the timer being
    /// cancelled. Arming an already armed session keeps the existing timer;
    /// retention counts from completion only. Returns `false` when nothing
    /// was armed (already armed, or the scheduler is shut down).
    pub fn arm<F>(&self, session_id: SessionId, on_expire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            debug!(session_id = %session_id, "Scheduler shut down, cleanup not armed");
            return false;
        }

        match self.timers.entry(session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let token = self.root.child_token();
                let timer_token = token.clone();
                let timers = Arc::clone(&self.timers);
                let retention = self.retention;
                let id = session_id.clone();

                let handle = tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(retention) => {
                            on_expire.await;
                            timers.remove(&id);
                            info!(session_id = %id, "Session retention expired, cleaned up");
                        }
                        _ = timer_token.cancelled() => {
                            debug!(session_id = %id, "Cleanup timer cancelled");
                        }
                    }
                });

                slot.insert(CleanupTimer { token, handle });
                debug!(
                    session_id = %session_id,
                    retention_secs = retention.as_secs(),
                    "Cleanup armed"
                );
                true
            }
        }
    }

    /// Cancel a single pending timer. Returns whether one was pending.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        match self.timers.remove(session_id) {
            Some((_, timer)) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a timer is pending for `session_id`.
    #[must_use]
    pub fn is_armed(&self, session_id: &SessionId) -> bool {
        self.timers.contains_key(session_id)
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every pending timer and wait for the timer tasks to finish.
    pub async fn shutdown(&self) {
        self.root.cancel();

        let ids: Vec<SessionId> = self.timers.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, timer)) = self.timers.remove(&id) {
                timer.token.cancel();
                handles.push(timer.handle);
            }
        }

        let cancelled = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "Cleanup timer task ended abnormally");
            }
        }
        info!(cancelled, "Cleanup scheduler stopped");
    }
}
