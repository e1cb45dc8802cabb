// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent State Machine
//!
//! Client side of the registration protocol. Registers with the registration node,
//! writes heartbeats on the same connection, and on any transport failure starts
//! over from registration. It never gives up; only the shutdown token stops it.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Reconnect-capable registration and heartbeat loop of an agent node

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::agent_state::{AgentEvent, AgentState};
use crate::domain::config::AgentConfig;
use crate::domain::wire::{encode_line, heartbeat_line, RegistrationRequest, WireError};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to connect to registration node {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// `host:port` of the registration node
    pub registry_addr: String,

    /// RPC port advertised at registration
    pub dispatch_port: u16,

    pub heartbeat_interval: Duration,

    /// Fixed wait between failed registration attempts
    pub retry_backoff: Duration,

    /// Host name sent along with the registration; informational only
    pub fqdn: Option<String>,
}

impl AgentSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        let fqdn = if config.advertise_fqdn {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
        } else {
            None
        };

        Self {
            registry_addr: config.registry_address(),
            dispatch_port: config.dispatch_port,
            heartbeat_interval: config.heartbeat_interval(),
            retry_backoff: config.retry_backoff(),
            fqdn,
        }
    }
}

/// Why a heartbeat session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

pub struct AgentStateMachine {
    settings: AgentSettings,
    state: watch::Sender<AgentState>,
    shutdown_token: CancellationToken,
}

impl AgentStateMachine {
    pub fn new(settings: AgentSettings) -> Self {
        let (state, _) = watch::channel(AgentState::Unregistered);
        Self {
            settings,
            state,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            registry = %self.settings.registry_addr,
            dispatch_port = self.settings.dispatch_port,
            "Starting agent registration loop"
        );
        self.transition(AgentEvent::Start);

        loop {
            let Some(stream) = self.register().await else {
                break;
            };
            self.transition(AgentEvent::Accepted);

            match self.establish_heartbeat(stream).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(reason) => {
                    warn!(%reason, "Registration session lost, reconnecting");
                    self.transition(AgentEvent::TransportFailure);
                    self.transition(AgentEvent::Retry);
                }
            }
        }

        info!("Agent registration loop stopped");
    }

    /// Connect and send the registration message, retrying with a fixed backoff until
    /// it succeeds. Returns `None` only when shut down.
    pub async fn register(&self) -> Option<TcpStream> {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            debug!(attempt, "Registering with registration node");

            tokio::select! {
                _ = self.shutdown_token.cancelled() => return None,
                result = self.try_register() => match result {
                    Ok(stream) => {
                        info!(
                            attempt,
                            registry = %self.settings.registry_addr,
                            "Registered with registration node"
                        );
                        return Some(stream);
                    }
                    Err(e) => {
                        warn!(
                            attempt,
                            error = %e,
                            retry_in_secs = self.settings.retry_backoff.as_secs_f64(),
                            "Registration failed, retrying"
                        );
                    }
                },
            }

            tokio::select! {
                _ = self.shutdown_token.cancelled() => return None,
                _ = tokio::time::sleep(self.settings.retry_backoff) => {}
            }
        }
    }

    async fn try_register(&self) -> Result<TcpStream, AgentError> {
        let mut stream = TcpStream::connect(&self.settings.registry_addr)
            .await
            .map_err(|source| AgentError::Connect {
                addr: self.settings.registry_addr.clone(),
                source,
            })?;

        let request = RegistrationRequest {
            agent_dispatch_port: self.settings.dispatch_port,
            fqdn: self.settings.fqdn.clone(),
        };
        stream.write_all(encode_line(&request)?.as_bytes()).await?;
        Ok(stream)
    }

    /// Write heartbeats on `stream` until it fails or the node closes it.
    ///
    /// The first heartbeat goes out immediately.
    async fn establish_heartbeat(&self, stream: TcpStream) -> SessionEnd {
        let (mut reader, mut writer) = stream.into_split();
        let heartbeat = heartbeat_line();
        let mut ticker = interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; 256];

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => return SessionEnd::Shutdown,
                _ = ticker.tick() => {
                    if let Err(e) = writer.write_all(heartbeat.as_bytes()).await {
                        return SessionEnd::Lost(format!("heartbeat write failed: {}", e));
                    }
                    debug!("Heartbeat sent");
                }
                // The node never writes on this connection; EOF means it dropped us.
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return SessionEnd::Lost("registration node closed the connection".to_string()),
                    Ok(n) => debug!(bytes = n, "Ignoring unexpected data from registration node"),
                    Err(e) => return SessionEnd::Lost(format!("connection error: {}", e)),
                },
            }
        }
    }

    fn transition(&self, event: AgentEvent) {
        self.state.send_if_modified(|state| match state.next(event) {
            Some(next) => {
                info!(from = %state, to = %next, "Agent state transition");
                *state = next;
                true
            }
            None => {
                debug_assert!(false, "invalid transition {:?} from {}", event, state);
                false
            }
        });
    }
}
