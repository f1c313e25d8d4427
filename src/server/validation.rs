//! Configuration validation
//!
//! Rejects settings the service cannot run with and warns about risky
//! production deployments.

use super::config::AppConfig;
use super::loader::environment_name;
use anyhow::{bail, Result};
use tracing::warn;

/// Validate configuration before startup
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let sessions = &config.sessions;
    if sessions.retention_secs == 0 {
        bail!("sessions.retention_secs must be greater than 0");
    }
    if sessions.keep_alive_secs == 0 {
        bail!("sessions.keep_alive_secs must be greater than 0");
    }
    if sessions.read_buffer_bytes == 0 {
        bail!("sessions.read_buffer_bytes must be greater than 0");
    }
    if sessions.max_batch == 0 {
        bail!("sessions.max_batch must be greater than 0");
    }
    if let Some(dir) = &sessions.working_dir {
        if !dir.is_dir() {
            bail!("sessions.working_dir {} is not a directory", dir.display());
        }
    }

    let is_production = environment_name().eq_ignore_ascii_case("production");
    if is_production && config.server.host == "0.0.0.0" {
        warn!(
            "SECURITY WARNING: Server is binding to all interfaces (0.0.0.0) in production. \
             Anyone who can reach it can run shell commands. \
             Consider binding to 127.0.0.1 behind an authenticating proxy."
        );
    }

    Ok(())
}
