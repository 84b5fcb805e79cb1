// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use reflexion_core::domain::config::ReflexionConfigManifest;

const EXAMPLE_CONFIG: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./reflexion-config.yaml)
        #[arg(short, long, default_value = "./reflexion-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ReflexionConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. REFLEXION_CONFIG_PATH: {}",
            std::env::var("REFLEXION_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./reflexion-config.yaml");
        println!("  4. ~/.reflexion/config.yaml");
        println!("  5. /etc/reflexion/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Loop:".bold());
    println!("  Max iterations: {}", spec.loop_config.max_iterations);
    println!("  Max generation retries: {}", spec.loop_config.max_generation_retries);
    println!("  Execution timeout: {}s", spec.loop_config.execution_timeout_secs);
    println!("  Cognition timeout: {}s", spec.loop_config.cognition_timeout_secs);
    println!("  Lessons per prompt: {}", spec.loop_config.lesson_retrieval_limit);
    println!();

    println!("{}", "Cognition Providers:".bold());
    for provider in &spec.cognition.providers {
        let status = if provider.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!("  {} ({}) {}", provider.name.bold(), provider.provider_type, status);
        println!("    Endpoint: {}", provider.endpoint);
        println!("    Model: {}", provider.model);
    }
    println!(
        "  Default provider: {}",
        spec.cognition.default_provider.as_deref().unwrap_or("(first enabled)")
    );
    if let Some(fallback) = &spec.cognition.fallback_provider {
        println!("  Fallback provider: {}", fallback);
    }
    println!();

    println!("{}", "Sandbox:".bold());
    println!("  Image: {}", spec.executor.image);
    println!("  Memory: {} MiB", spec.executor.memory_bytes / (1024 * 1024));
    println!("  CPU: {}m", spec.executor.cpu_millis);
    println!("  Network: {}", spec.executor.network_mode);
    println!();

    println!("{}", "Storage:".bold());
    println!("  Checkpoints: {}", display_or_memory(&spec.storage.checkpoint_dir));
    println!("  Lesson journal: {}", display_or_memory(&spec.storage.lesson_journal));
    println!();

    Ok(())
}

fn display_or_memory(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(in memory)".to_string())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ReflexionConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLE_CONFIG.to_string()
    } else {
        ReflexionConfigManifest::default().to_yaml_string()?
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_is_valid() {
        let config = ReflexionConfigManifest::from_yaml_str(EXAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.spec.cognition.providers.len(), 3);
        assert!(config.spec.storage.checkpoint_dir.is_some());
    }

    #[tokio::test]
    async fn test_generated_minimal_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("reflexion-config.yaml");

        generate(output.clone(), false).await.unwrap();

        let config = ReflexionConfigManifest::from_yaml_file(&output).unwrap();
        config.validate().unwrap();
        assert_eq!(config.spec.loop_config.max_iterations, 5);
    }
}
