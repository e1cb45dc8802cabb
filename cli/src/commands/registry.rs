// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `muster registry` - run a registration node

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use muster_core::domain::config::MusterConfig;
use muster_core::infrastructure::RegistrationServer;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::signal::shutdown_signal;

#[derive(Args, Debug, Default)]
pub struct RegistryArgs {
    /// Registration port (overrides spec.registry.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind (overrides spec.registry.bind_address)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Seconds without a heartbeat before an agent is culled
    #[arg(long, value_name = "SECONDS")]
    pub stale_threshold: Option<u64>,
}

impl RegistryArgs {
    /// Fold command-line overrides into `config`.
    pub fn apply(&self, config: &mut MusterConfig) {
        let registry = &mut config.spec.registry;
        if let Some(port) = self.port {
            registry.port = port;
        }
        if let Some(bind) = &self.bind {
            registry.bind_address = bind.clone();
        }
        if let Some(threshold) = self.stale_threshold {
            registry.stale_threshold_seconds = threshold;
        }
    }
}

pub async fn run(args: RegistryArgs, mut config: MusterConfig) -> Result<()> {
    args.apply(&mut config);
    config
        .validate()
        .context("Configuration validation failed")?;

    let shutdown = CancellationToken::new();
    let server = RegistrationServer::start_with_shutdown(&config.spec.registry, shutdown.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to start registration node on {}",
                config.spec.registry.listen_address()
            )
        })?;

    println!(
        "{}",
        format!("✓ Registration node listening on {}", server.local_addr()).green()
    );

    shutdown_signal().await;
    info!(
        registered = server.registry().len(),
        "Shutting down registration node"
    );
    server.shutdown().await;

    Ok(())
}
