//! cmdrelay Core - Command Sessions
//!
//! This crate holds everything about a command session that is not HTTP:
//! - Buffer: append-only, offset-addressed output log with follow readers
//! - Runner: spawns the shell command and drains its pipes into the buffer
//! - Registry: creates, resolves and lists sessions
//! - Multiplexer: per-connection replay and live tail with keep-alives
//! - Cleanup: retention timers for completed sessions
//! - Shutdown: coordinated stop of streams and timers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod chunk;
pub mod cleanup;
pub mod error;
pub mod event;
pub mod multiplexer;
pub mod registry;
pub mod runner;
pub mod session;
pub mod shutdown;

pub use buffer::{BufferReader, Completion, OutputBuffer, Watermark, DEFAULT_MAX_BATCH};
pub use chunk::{ChunkKind, OutputChunk};
pub use cleanup::{CleanupScheduler, DEFAULT_RETENTION};
pub use error::{Error, Result};
pub use event::{StreamEvent, EXIT_MESSAGE};
pub use multiplexer::{
    MultiplexerConfig, StreamItem, StreamMultiplexer, Subscription, DEFAULT_KEEP_ALIVE,
};
pub use registry::{Attachment, RegistryConfig, SessionRegistry};
pub use runner::{
    preflight, ProcessRunner, RunnerConfig, ShellSpec, DEFAULT_DRAIN_GRACE, DEFAULT_READ_BUFFER_BYTES,
};
pub use session::{Session, SessionDetail, SessionId, SessionSummary, SubscriberGuard};
pub use shutdown::{
    shutdown_signal_with_controller, wait_for_shutdown_signal, ShutdownController,
    ShutdownPhase, StreamGuard,
};
