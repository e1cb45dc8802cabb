// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Node
//!
//! Runs the registration/heartbeat state machine next to the RPC listener. The two
//! use independent sockets and only share the shutdown token.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::agent_state::AgentState;
use crate::domain::config::{AgentConfig, RpcConfig};
use crate::domain::dispatch::Dispatcher;
use crate::infrastructure::agent_client::{AgentSettings, AgentStateMachine};
use crate::infrastructure::rpc_listener::{AgentRpcListener, RpcError, RpcListenerConfig};

pub struct AgentNode {
    state_machine: Arc<AgentStateMachine>,
    rpc_addr: SocketAddr,
    shutdown_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentNode {
    /// Bind the RPC port from `agent.dispatch_port`, then start registering.
    pub async fn start(
        agent: &AgentConfig,
        rpc: &RpcConfig,
        dispatcher: Arc<dyn Dispatcher>,
        shutdown_token: CancellationToken,
    ) -> Result<Self, RpcError> {
        let listener = AgentRpcListener::bind(
            (rpc.bind_address.as_str(), agent.dispatch_port),
            dispatcher,
            RpcListenerConfig {
                concurrent: rpc.concurrent,
                request_timeout: rpc.request_timeout(),
                max_line_length: rpc.max_line_length,
            },
        )
        .await?
        .with_shutdown(shutdown_token.clone());
        let rpc_addr = listener.local_addr()?;

        // Advertise the port actually bound (differs from the config when it is 0).
        let mut settings = AgentSettings::from_config(agent);
        settings.dispatch_port = rpc_addr.port();

        let state_machine =
            Arc::new(AgentStateMachine::new(settings).with_shutdown(shutdown_token.clone()));

        let tasks = vec![listener.start(), state_machine.clone().start()];
        info!(%rpc_addr, registry = %agent.registry_address(), "Agent node started");

        Ok(Self {
            state_machine,
            rpc_addr,
            shutdown_token,
            tasks,
        })
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    pub fn state(&self) -> AgentState {
        self.state_machine.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state_machine.subscribe()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Agent node worker ended abnormally");
            }
        }
        info!("Agent node stopped");
    }

    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        self.wait().await;
    }
}
