// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use muster_core::domain::config::MusterConfig;

#[derive(Subcommand, Debug)]
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

    /// Generate a configuration file holding the defaults
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./muster-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)).map(|_| ()),
        ConfigCommand::Generate { output, force } => generate(&output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = MusterConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. MUSTER_CONFIG_PATH: {}",
            std::env::var("MUSTER_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./muster-config.yaml");
        println!("  4. ~/.muster/config.yaml");
        println!("  5. /etc/muster/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let registry = &config.spec.registry;
    println!("{}", "Registration node:".bold());
    println!("  Listen: {}", registry.listen_address());
    println!("  Stale threshold: {}s", registry.stale_threshold_seconds);
    println!("  Cull interval: {}s", registry.cull_interval_seconds);
    println!("  Poll interval: {}ms", registry.poll_interval_ms);
    println!("  Max registration retries: {}", registry.max_registration_retries);
    println!();

    let agent = &config.spec.agent;
    println!("{}", "Agent node:".bold());
    println!("  Registration node: {}", agent.registry_address());
    println!("  Dispatch port: {}", agent.dispatch_port);
    println!("  Heartbeat interval: {}s", agent.heartbeat_interval_seconds);
    println!("  Retry backoff: {}s", agent.retry_backoff_seconds);
    println!(
        "  RPC: {}",
        if config.spec.rpc.concurrent {
            "concurrent"
        } else {
            "sequential"
        }
    );
    println!();

    println!("{}", "Logging:".bold());
    println!("  Level: {}", config.spec.logging.level);
    println!("  Format: {}", config.spec.logging.format);

    Ok(())
}

/// Load and validate; returns the validated configuration.
pub fn validate(config_path: Option<PathBuf>) -> Result<MusterConfig> {
    println!("Validating configuration...");

    let config = MusterConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(config)
}

pub fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    MusterConfig::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
