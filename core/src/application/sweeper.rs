// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Culling Sweeper - background eviction of silent agents
//!
//! Read failures only catch agents whose socket actually breaks. A half-open
//! connection never becomes readable, so this task periodically evicts every
//! registration whose last heartbeat is older than the stale threshold.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Bounded staleness for the registry independent of socket state

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::registry::Registry;
use crate::domain::registration::ConnectionId;

/// Whatever keeps per-connection heartbeat interest for registered agents.
///
/// Implemented by the heartbeat multiplexer handle.
pub trait HeartbeatInterests: Send + Sync {
    /// Drop the interest for `connection`. Unknown connections are ignored.
    fn forget(&self, connection: ConnectionId);
}

#[derive(Debug, Clone)]
pub struct CullingConfig {
    /// Registrations silent for strictly longer than this are evicted
    pub stale_threshold: Duration,

    /// How often the sweep runs
    pub interval: Duration,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(300),
            interval: Duration::from_secs(120),
        }
    }
}

pub struct CullingSweeper {
    registry: Registry,
    interests: Arc<dyn HeartbeatInterests>,
    config: CullingConfig,
    shutdown_token: CancellationToken,
}

impl CullingSweeper {
    pub fn new(
        registry: Registry,
        interests: Arc<dyn HeartbeatInterests>,
        config: CullingConfig,
    ) -> Self {
        Self {
            registry,
            interests,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Share an externally owned shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting culling sweeper"
        );

        // First sweep one full period after start.
        let period = self.config.interval;
        let mut tick = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let culled = self.cull(Instant::now());
                    if culled > 0 {
                        info!(culled, remaining = self.registry.len(), "Culling sweep completed");
                    } else {
                        debug!("Culling sweep found nothing stale");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping culling sweeper");
                    break;
                }
            }
        }
    }

    /// Evict every registration stale at `now`. Returns how many were evicted.
    pub fn cull(&self, now: Instant) -> usize {
        let stale = self.registry.select_stale(now, self.config.stale_threshold);
        let mut culled = 0;

        for entry in stale {
            // Registry first: once the entry is gone the multiplexer will not re-adopt it.
            if self.registry.evict(&entry.identity, entry.connection) {
                warn!(
                    identity = %entry.identity,
                    connection = %entry.connection,
                    silent_secs = entry.silent_for.as_secs(),
                    "Culled silent agent"
                );
                culled += 1;
            }
            self.interests.forget(entry.connection);
        }

        culled
    }
}
