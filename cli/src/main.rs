// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Reflexion CLI
//!
//! The `reflexion` binary drives the code-repair loop in-process: it
//! synthesizes tests for a task, generates a candidate, runs it in a Docker
//! sandbox and reflects on failures until the tests pass or the iteration
//! budget is spent.
//!
//! ## Commands
//!
//! - `reflexion run <task>` - Start a new episode and stream its progress
//! - `reflexion resume <episode-id>` - Continue an episode from its checkpoint
//! - `reflexion config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use reflexion_cli::commands::{self, ConfigCommand, ResumeArgs, RunArgs};
use reflexion_core::domain::config::ReflexionConfigManifest;

/// Reflexion - self-correcting code generation
#[derive(Parser)]
#[command(name = "reflexion")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "REFLEXION_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "REFLEXION_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new episode for a task description
    #[command(name = "run")]
    Run(RunArgs),

    /// Resume an episode from its last checkpoint
    #[command(name = "resume")]
    Resume(ResumeArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = load_config(cli.config, cli.log_level.as_deref())?;
            commands::run::execute(args, config).await
        }
        Commands::Resume(args) => {
            let config = load_config(cli.config, cli.log_level.as_deref())?;
            commands::resume::execute(args, config).await
        }
        Commands::Config { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "compact")?;
            commands::config::handle_command(command, cli.config).await
        }
    }
}

/// Load the manifest, then install logging as it configures. `--log-level`
/// overrides the manifest's level.
fn load_config(path: Option<PathBuf>, log_level: Option<&str>) -> Result<ReflexionConfigManifest> {
    let config = ReflexionConfigManifest::load_or_default(path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let logging = &config.spec.observability.logging;
    init_logging(log_level.unwrap_or(&logging.level), &logging.format)?;
    Ok(config)
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
