// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registration Listener
//!
//! Accept loop for inbound agent registrations. Every accepted connection gets its own
//! short-lived task that reads the registration message, inserts the registry entry
//! and hands the connection's read side to the heartbeat multiplexer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** TCP entry point of the registration protocol

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::{timeout, Instant};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::registry::{Registry, RegistryError};
use crate::application::sweeper::HeartbeatInterests;
use crate::domain::registration::{AgentIdentity, AgentRegistration, ConnectionHandle};
use crate::domain::wire::{decode_line, RegistrationRequest, WireError, DEFAULT_MAX_LINE_LENGTH};
use crate::infrastructure::multiplexer::{MultiplexerError, MultiplexerHandle};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{0} sent no registration within the handshake timeout")]
    HandshakeTimeout(AgentIdentity),

    #[error("{0} closed the connection before registering")]
    ClosedBeforeRegistration(AgentIdentity),

    #[error("Failed to read registration: {0}")]
    Framing(#[from] LinesCodecError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("{identity} still conflicting after {attempts} registration attempts")]
    RetriesExhausted {
        identity: AgentIdentity,
        attempts: u32,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct RegistrationHandlerConfig {
    /// Conflict evictions allowed before giving up on a registration
    pub max_retries: u32,

    /// How long a new connection may stay silent before its first message
    pub handshake_timeout: Duration,

    pub max_line_length: usize,
}

impl Default for RegistrationHandlerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            handshake_timeout: Duration::from_secs(30),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Turns one accepted connection into a registry entry plus a heartbeat interest.
pub struct RegistrationHandler {
    registry: Registry,
    multiplexer: MultiplexerHandle,
    config: RegistrationHandlerConfig,
}

impl RegistrationHandler {
    pub fn new(
        registry: Registry,
        multiplexer: MultiplexerHandle,
        config: RegistrationHandlerConfig,
    ) -> Self {
        Self {
            registry,
            multiplexer,
            config,
        }
    }

    /// Register the agent behind `stream`.
    ///
    /// On any error the connection is dropped, and with it closed.
    pub async fn handle(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<AgentIdentity, RegistrationError> {
        // Identity comes from the socket, never from the payload.
        let identity = AgentIdentity::from_peer(peer);
        let (read_half, write_half) = stream.into_split();
        let mut frames = FramedRead::new(
            read_half,
            LinesCodec::new_with_max_length(self.config.max_line_length),
        );

        let line = match timeout(self.config.handshake_timeout, frames.next()).await {
            Err(_) => return Err(RegistrationError::HandshakeTimeout(identity)),
            Ok(None) => return Err(RegistrationError::ClosedBeforeRegistration(identity)),
            Ok(Some(line)) => line?,
        };
        let request: RegistrationRequest = decode_line(&line)?;

        info!(
            %identity,
            dispatch_port = request.agent_dispatch_port,
            fqdn = request.fqdn.as_deref().unwrap_or("-"),
            "Registration received"
        );

        let connection = ConnectionHandle::new(peer, write_half);
        let connection_id = connection.id();
        let mut registration =
            AgentRegistration::new(identity, connection, request.into_metadata());
        let mut retries = 0;

        loop {
            match self.registry.register(registration) {
                Ok(()) => break,
                Err(RegistryError::DoubleRegistration {
                    existing, rejected, ..
                }) => {
                    if retries >= self.config.max_retries {
                        return Err(RegistrationError::RetriesExhausted {
                            identity,
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;
                    warn!(
                        %identity,
                        %existing,
                        retry = retries,
                        "Double registration, evicting previous session"
                    );
                    self.registry.evict(&identity, existing);
                    self.multiplexer.forget(existing);

                    registration = *rejected;
                    registration.refresh(Instant::now());
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self.multiplexer.watch(identity, connection_id, frames) {
            self.registry.evict(&identity, connection_id);
            return Err(e.into());
        }

        info!(%identity, connection = %connection_id, "Agent registered");
        Ok(identity)
    }
}

/// Accept loop on the registration port.
pub struct RegistrationListener {
    listener: TcpListener,
    handler: Arc<RegistrationHandler>,
    shutdown_token: CancellationToken,
}

impl RegistrationListener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        handler: RegistrationHandler,
    ) -> Result<Self, RegistrationError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            shutdown_token: CancellationToken::new(),
        })
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RegistrationError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "Registration listener accepting connections"),
            Err(e) => warn!(error = %e, "Registration listener address unavailable"),
        }

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping registration listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Registration connection accepted");
                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle(stream, peer).await {
                                match e {
                                    RegistrationError::RetriesExhausted { .. }
                                    | RegistrationError::Multiplexer(_) => {
                                        error!(%peer, error = %e, "Registration failed")
                                    }
                                    _ => warn!(%peer, error = %e, "Registration rejected"),
                                }
                            }
                        });
                    }
                    Err(e) => {
                        // Typically EMFILE or a reset during accept; keep serving.
                        warn!(error = %e, "Failed to accept registration connection");
                    }
                },
            }
        }
    }
}
