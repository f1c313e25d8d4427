//! Session Registry
//!
//! Maps session identifiers to sessions. Creates sessions and starts their
//! runners, resolves reconnections, lists sessions for the runs endpoint and
//! owns the cleanup scheduler that evicts completed sessions.

use crate::cleanup::{CleanupScheduler, DEFAULT_RETENTION};
use crate::error::{Error, Result};
use crate::runner::{ProcessRunner, RunnerConfig};
use crate::session::{Session, SessionId, SessionSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How commands are spawned
    pub runner: RunnerConfig,
    /// How long a completed session stays available
    pub retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Result of [`SessionRegistry::start_or_attach`].
#[derive(Debug, Clone)]
pub enum Attachment {
    /// A new session was created and its command started
    Created(Arc<Session>),
    /// An existing session was found; nothing was spawned
    Existing(Arc<Session>),
}

impl Attachment {
    /// The session, whichever way it was obtained.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }

    /// Whether the session was just created.
    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Owns every live and recently completed session.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    runner: ProcessRunner,
    cleanup: CleanupScheduler,
    shutdown: CancellationToken,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry. Cancelling `shutdown` stops new sessions from being
    /// created and cancels pending cleanup timers.
    #[must_use]
    pub fn new(config: RegistryConfig, shutdown: CancellationToken) -> Arc<Self> {
        let runner = ProcessRunner::new(config.runner);
        debug!(
            shell = %runner.config().shell.program,
            preflight = runner.config().preflight,
            retention_secs = config.retention.as_secs(),
            "Session registry created"
        );
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            runner,
            cleanup: CleanupScheduler::new(config.retention, shutdown.child_token()),
            shutdown,
            next_seq: AtomicU64::new(0),
        })
    }

    /// Resolve `session_id` to an existing session, or create a new session
    /// running `command`.
    ///
    /// An absent, unknown or expired identifier creates a session under a
    /// freshly generated identifier. `command` is ignored when an existing
    /// session is returned.
    pub async fn start_or_attach(
        self: &Arc<Self>,
        command: &str,
        session_id: Option<&str>,
    ) -> Result<Attachment> {
        let requested = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(SessionId::from);

        if let Some(id) = &requested {
            if let Some(session) = self.sessions.read().await.get(id) {
                debug!(session_id = %id, "Reattaching to existing session");
                return Ok(Attachment::Existing(Arc::clone(session)));
            }
        }

        if command.trim().is_empty() {
            return Err(Error::InvalidRequest("command text is required".to_string()));
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let session = {
            let mut sessions = self.sessions.write().await;
            // The id may have been registered between the read and write locks.
            if let Some(session) = requested.as_ref().and_then(|id| sessions.get(id)) {
                return Ok(Attachment::Existing(Arc::clone(session)));
            }
            let id = SessionId::generate();
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let session = Arc::new(Session::new(id.clone(), command, seq));
            sessions.insert(id, Arc::clone(&session));
            session
        };

        if let Some(stale) = &requested {
            info!(
                requested = %stale,
                session_id = %session.id(),
                "Unknown session requested, started a new one"
            );
        } else {
            info!(session_id = %session.id(), command = %command, "Session created");
        }

        self.spawn_runner(Arc::clone(&session));
        Ok(Attachment::Created(session))
    }

    fn spawn_runner(self: &Arc<Self>, session: Arc<Session>) {
        let registry = Arc::downgrade(self);
        let runner = self.runner.clone();

        tokio::spawn(async move {
            if let Err(e) = runner.run(&session).await {
                error!(session_id = %session.id(), error = %e, "Process runner failed");
                return;
            }
            if let Some(registry) = registry.upgrade() {
                registry.schedule_cleanup(session.id().clone());
            }
        });
    }

    fn schedule_cleanup(self: &Arc<Self>, session_id: SessionId) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let id = session_id.clone();
        self.cleanup.arm(session_id, async move {
            if let Some(registry) = registry.upgrade() {
                registry.remove(&id).await;
            }
        });
    }

    async fn remove(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(session) = &removed {
            debug!(
                session_id = %session_id,
                subscribers = session.subscriber_count(),
                "Session evicted"
            );
        }
        removed
    }

    /// Look up a session.
    pub async fn get(&self, session_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&SessionId::from(session_id))
            .cloned()
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))
    }

    /// Summaries of every known session, newest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.started_at()
                .cmp(&a.started_at())
                .then_with(|| b.seq().cmp(&a.seq()))
        });

        let mut summaries = Vec::with_capacity(sessions.len());
        for session in &sessions {
            summaries.push(session.summary().await);
        }
        summaries
    }

    /// Remove a session now and cancel its cleanup timer.
    pub async fn evict(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.cleanup.cancel(session_id);
        self.remove(session_id).await
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Cleanup timers still pending.
    #[must_use]
    pub fn pending_cleanups(&self) -> usize {
        self.cleanup.pending()
    }

    /// Stop accepting new sessions and cancel every cleanup timer.
    ///
    /// Running processes are left alone.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.cleanup.shutdown().await;
        info!(sessions = self.len().await, "Session registry stopped");
    }
}
