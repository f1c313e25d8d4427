//! Server module for cmdrelay
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Startup configuration checks
//! - `logging`: Tracing subscriber setup
//! - `init`: State, router and run loop

pub mod config;
mod init;
mod loader;
mod logging;
mod validation;

pub use init::{build_router, build_state, run};
pub use loader::{load_config, DEFAULT_CONFIG};
pub use logging::init_logging;
pub use validation::validate_config;
