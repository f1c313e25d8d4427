//! Server configuration types

use cmdrelay_core::{MultiplexerConfig, RegistryConfig, RunnerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

/// Command session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Seconds a completed session stays available
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Idle seconds before a keep-alive comment
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Pipe read size in bytes
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
    /// Chunks pulled from a buffer per write
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Resolve the leading program before spawning
    #[serde(default = "default_true")]
    pub preflight: bool,
    /// Milliseconds to keep reading output after the shell exits
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
    /// Shell override (host shell when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Working directory for commands (service's own when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            keep_alive_secs: default_keep_alive_secs(),
            read_buffer_bytes: default_read_buffer_bytes(),
            max_batch: default_max_batch(),
            preflight: true,
            drain_grace_ms: default_drain_grace_ms(),
            shell: None,
            working_dir: None,
        }
    }
}

fn default_retention_secs() -> u64 {
    300
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_read_buffer_bytes() -> usize {
    cmdrelay_core::DEFAULT_READ_BUFFER_BYTES
}
fn default_max_batch() -> usize {
    cmdrelay_core::DEFAULT_MAX_BATCH
}
fn default_drain_grace_ms() -> u64 {
    cmdrelay_core::DEFAULT_DRAIN_GRACE.as_millis() as u64
}
fn default_true() -> bool {
    true
}

impl SessionsConfig {
    /// Registry settings derived from this section.
    pub fn registry_config(&self) -> RegistryConfig {
        let mut runner = RunnerConfig::new()
            .with_read_buffer(self.read_buffer_bytes)
            .with_preflight(self.preflight)
            .with_drain_grace(Duration::from_millis(self.drain_grace_ms));
        if let Some(shell) = &self.shell {
            runner = runner.with_shell(shell.clone());
        }
        if let Some(dir) = &self.working_dir {
            runner = runner.with_working_dir(dir.clone());
        }
        RegistryConfig {
            runner,
            retention: Duration::from_secs(self.retention_secs),
        }
    }

    /// Stream settings derived from this section.
    pub fn multiplexer_config(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            max_batch: self.max_batch,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write daily-rolled JSON logs here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

fn default_filter() -> String {
    "cmdrelay=info,cmdrelay_core=info,tower_http=info".to_string()
}
