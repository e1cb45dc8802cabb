// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `muster agent` - run an agent node

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use muster_core::application::plugins::PluginDispatcher;
use muster_core::domain::config::MusterConfig;
use muster_core::infrastructure::AgentNode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::signal::shutdown_signal;

#[derive(Args, Debug, Default)]
pub struct AgentArgs {
    /// Registration node host
    #[arg(long, value_name = "HOST")]
    pub registry_host: Option<String>,

    /// Registration node port
    #[arg(long, value_name = "PORT")]
    pub registry_port: Option<u16>,

    /// RPC port to listen on and advertise
    #[arg(long, value_name = "PORT")]
    pub dispatch_port: Option<u16>,

    /// Serve RPC connections concurrently
    #[arg(long)]
    pub concurrent: bool,
}

impl AgentArgs {
    pub fn apply(&self, config: &mut MusterConfig) {
        let agent = &mut config.spec.agent;
        if let Some(host) = &self.registry_host {
            agent.registry_host = host.clone();
        }
        if let Some(port) = self.registry_port {
            agent.registry_port = port;
        }
        if let Some(port) = self.dispatch_port {
            agent.dispatch_port = port;
        }
        if self.concurrent {
            config.spec.rpc.concurrent = true;
        }
    }
}

pub async fn run(args: AgentArgs, mut config: MusterConfig) -> Result<()> {
    args.apply(&mut config);
    config
        .validate()
        .context("Configuration validation failed")?;

    let dispatcher = Arc::new(PluginDispatcher::with_system_plugin());
    let shutdown = CancellationToken::new();
    let node = AgentNode::start(&config.spec.agent, &config.spec.rpc, dispatcher, shutdown)
        .await
        .with_context(|| {
            format!(
                "Failed to bind agent RPC port {}",
                config.spec.agent.dispatch_port
            )
        })?;

    println!(
        "{}",
        format!(
            "✓ Agent node serving RPC on {}, registering with {}",
            node.rpc_addr(),
            config.spec.agent.registry_address()
        )
        .green()
    );

    shutdown_signal().await;
    info!(state = %node.state(), "Shutting down agent node");
    node.shutdown().await;

    Ok(())
}
