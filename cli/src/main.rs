// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # muster
//!
//! One binary, two node types:
//!
//! - `muster registry` - registration node: accepts agent registrations, watches
//!   heartbeats and culls silent agents
//! - `muster agent` - agent node: registers, heartbeats, serves RPC actions
//!
//! Plus dispatcher and configuration tooling:
//!
//! - `muster call <host> <plugin> <action>` - invoke an action on an agent
//! - `muster config show|validate|generate` - configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use muster_cli::commands::{self, AgentArgs, CallArgs, ConfigCommand, RegistryArgs};
use muster_cli::logging::{init_logging, LogFormat};
use muster_core::domain::config::MusterConfig;

/// muster - agent registration, heartbeats and dispatch
#[derive(Parser)]
#[command(name = "muster")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to spec.logging.level
    #[arg(long, global = true, env = "MUSTER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to spec.logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a registration node
    #[command(name = "registry")]
    Registry(RegistryArgs),

    /// Run an agent node
    #[command(name = "agent")]
    Agent(AgentArgs),

    /// Invoke an action on an agent
    #[command(name = "call")]
    Call(CallArgs),

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

    let Some(command) = cli.command else {
        // No command provided - show help
        eprintln!("{}", "No command specified. Use --help for usage.".yellow());
        std::process::exit(1);
    };

    // Config commands report their own load errors.
    if let Commands::Config { command } = command {
        init_logging(cli.log_level.as_deref().unwrap_or("warn"), LogFormat::Text)?;
        return commands::config::handle_command(command, cli.config).await;
    }

    let config = MusterConfig::load_or_default(cli.config.clone())
        .context("Failed to load configuration")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.spec.logging.level.clone());
    let format = LogFormat::parse(
        cli.log_format
            .as_deref()
            .unwrap_or(&config.spec.logging.format),
    )?;
    init_logging(&level, format)?;
    info!(name = %config.metadata.name, "Configuration loaded");

    match command {
        Commands::Registry(args) => commands::registry::run(args, config).await,
        Commands::Agent(args) => commands::agent::run(args, config).await,
        Commands::Call(args) => commands::call::run(args, config.spec.agent.dispatch_port).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}
