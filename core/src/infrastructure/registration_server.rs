// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registration Server
//!
//! Assembles a registration node: one [`Registry`], one accept loop, exactly one
//! heartbeat multiplexer and exactly one culling sweeper, all sharing a shutdown token.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::registry::Registry;
use crate::application::sweeper::{CullingConfig, CullingSweeper};
use crate::domain::config::RegistryConfig;
use crate::infrastructure::multiplexer::{HeartbeatMultiplexer, MultiplexerHandle};
use crate::infrastructure::registration_listener::{
    RegistrationError, RegistrationHandler, RegistrationHandlerConfig, RegistrationListener,
};

pub struct RegistrationServer {
    registry: Registry,
    multiplexer: MultiplexerHandle,
    local_addr: SocketAddr,
    shutdown_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RegistrationServer {
    /// Bind the registration port and start every worker.
    pub async fn start(config: &RegistryConfig) -> Result<Self, RegistrationError> {
        Self::start_with_shutdown(config, CancellationToken::new()).await
    }

    pub async fn start_with_shutdown(
        config: &RegistryConfig,
        shutdown_token: CancellationToken,
    ) -> Result<Self, RegistrationError> {
        let registry = Registry::new();

        let (multiplexer, handle) =
            HeartbeatMultiplexer::new(registry.clone(), config.poll_interval());
        let multiplexer = multiplexer.with_shutdown(shutdown_token.clone());

        let handler = RegistrationHandler::new(
            registry.clone(),
            handle.clone(),
            RegistrationHandlerConfig {
                max_retries: config.max_registration_retries,
                handshake_timeout: config.handshake_timeout(),
                max_line_length: config.max_line_length,
            },
        );
        let listener = RegistrationListener::bind(config.listen_address(), handler)
            .await?
            .with_shutdown(shutdown_token.clone());
        let local_addr = listener.local_addr()?;

        let sweeper = Arc::new(
            CullingSweeper::new(
                registry.clone(),
                Arc::new(handle.clone()),
                CullingConfig {
                    stale_threshold: config.stale_threshold(),
                    interval: config.cull_interval(),
                },
            )
            .with_shutdown(shutdown_token.clone()),
        );

        let tasks = vec![multiplexer.start(), sweeper.start(), listener.start()];

        info!(%local_addr, "Registration server started");

        Ok(Self {
            registry,
            multiplexer: handle,
            local_addr,
            shutdown_token,
            tasks,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn multiplexer(&self) -> &MultiplexerHandle {
        &self.multiplexer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Wait until the shutdown token is cancelled and every worker has stopped.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Registration server worker ended abnormally");
            }
        }
        info!("Registration server stopped");
    }

    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        self.wait().await;
    }
}
