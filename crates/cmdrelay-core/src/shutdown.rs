//! Graceful Shutdown
//!
//! One [`ShutdownController`] per service. Components take child tokens
//! from it; open run streams hold a [`StreamGuard`] so shutdown can wait for
//! them to close. Spawned commands are never signalled: shutdown only stops
//! new sessions, ends open streams and cancels cleanup timers.
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//! let registry = SessionRegistry::new(config, shutdown.token());
//!
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(shutdown_signal_with_controller(shutdown.clone()))
//!     .await?;
//! ```

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time allowed for open streams to close
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Token cancelled, waiting for open streams to close
    Draining,
    /// Shutdown complete
    Terminated,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Coordinates service shutdown.
#[derive(Debug)]
pub struct ShutdownController {
    cancel_token: CancellationToken,
    phase: AtomicU8,
    open_streams: AtomicUsize,
    drained: Notify,
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Create a controller with the default drain timeout.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))
    }

    /// Create a controller with a custom drain timeout.
    #[must_use]
    pub fn with_timeout(drain_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
            open_streams: AtomicUsize::new(0),
            drained: Notify::new(),
            drain_timeout,
        })
    }

    /// Token for a component; cancelled when shutdown starts.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Whether shutdown has started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    /// Track an open stream until the guard is dropped.
    #[must_use]
    pub fn track_stream(self: &Arc<Self>) -> StreamGuard {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        StreamGuard {
            controller: Arc::clone(self),
        }
    }

    /// Number of open streams.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Cancel every token and wait (bounded) for open streams to close.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        if self
            .phase
            .compare_exchange(
                ShutdownPhase::Running as u8,
                ShutdownPhase::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }
        info!(phase = %ShutdownPhase::Draining, "Shutdown phase changed");
        self.cancel_token.cancel();

        let drain = async {
            loop {
                let notified = self.drained.notified();
                let open = self.open_streams();
                if open == 0 {
                    break;
                }
                debug!(open_streams = open, "Waiting for streams to close");
                notified.await;
            }
        };

        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                open_streams = self.open_streams(),
                timeout_secs = self.drain_timeout.as_secs(),
                "Streams still open after drain timeout"
            );
        } else {
            info!("All streams closed");
        }

        self.set_phase(ShutdownPhase::Terminated);
    }
}

/// Keeps a stream counted as open; drop to release.
#[derive(Debug)]
pub struct StreamGuard {
    controller: Arc<ShutdownController>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.controller.open_streams.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.controller.drained.notify_waiters();
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Wait for a shutdown signal, then run the controller's shutdown.
pub async fn shutdown_signal_with_controller(controller: Arc<ShutdownController>) {
    wait_for_shutdown_signal().await;
    controller.shutdown().await;
}
