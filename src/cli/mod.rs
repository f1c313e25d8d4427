//! CLI module for cmdrelay
//!
//! - `serve`: start the HTTP server
//! - `config`: print the effective configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmdrelay::server::{self, config::AppConfig};

/// cmdrelay CLI
#[derive(Parser, Debug)]
#[command(name = "cmdrelay")]
#[command(about = "Run shell commands and stream their output over HTTP")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Override server.host
        #[arg(long)]
        host: Option<String>,
        /// Override server.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn apply_overrides(config: &mut AppConfig, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve { host, port }) => {
            let mut config = server::load_config().context("Failed to load configuration")?;
            apply_overrides(&mut config, host, port);
            let _log_guard = server::init_logging(&config.logging)?;
            server::run(config).await
        }
        Some(Commands::Config) => {
            let config = server::load_config().context("Failed to load configuration")?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to serialize config")?;
            print!("{rendered}");
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from(["cmdrelay", "serve", "--port", "9001"]).unwrap();
        match cli.command {
            Some(Commands::Serve { host, port }) => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9001));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, Some("0.0.0.0".to_string()), None);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8787);
    }
}
