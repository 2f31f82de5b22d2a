// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Partner Agent
//!
//! The `partner-agent` binary runs the reconciliation service in front of an external
//! identity agent.
//!
//! ## Commands
//!
//! - `partner-agent serve` (default) - Run the HTTP server, event subscribers and periodic jobs
//! - `partner-agent config show|validate|generate` - Configuration management
//!
//! A `.env` file in the working directory is loaded before arguments are parsed, so every
//! flag below can also come from there.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

mod commands;
mod server;

use commands::ConfigCommand;
use partner_agent_core::domain::agent_config::AgentConfigManifest;

/// Partner Agent - keeps connections, credentials and proofs in step with an identity agent
#[derive(Parser)]
#[command(name = "partner-agent")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PARTNER_AGENT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP listen host
    #[arg(long, global = true, env = "PARTNER_AGENT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// HTTP listen port
    #[arg(long, global = true, env = "PARTNER_AGENT_PORT", default_value = "8080")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PARTNER_AGENT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "PARTNER_AGENT_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Compact
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    #[command(name = "serve")]
    Serve,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command {
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Serve) | None => {
            let config = AgentConfigManifest::load_or_default(cli.config).context("Failed to load configuration")?;
            info!(name = %config.metadata.name, "Starting partner agent");
            server::run(config, &cli.host, cli.port).await
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
