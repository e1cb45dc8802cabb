// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Heartbeat Multiplexer
//!
//! One task watches the read side of every registered connection. Each line read is
//! either the heartbeat token, which refreshes the registry entry, or a protocol
//! failure, which evicts the agent and closes its connection.
//!
//! The interest table (`ConnectionId → AgentIdentity`) and the framed streams are
//! private to the worker. Other components change them only through
//! [`MultiplexerHandle`], whose commands are applied in order by the worker.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Readiness-driven heartbeat reads for N connections on one worker

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::registry::{Registry, RegistryError};
use crate::application::sweeper::HeartbeatInterests;
use crate::domain::registration::{AgentIdentity, ConnectionId};
use crate::domain::wire::is_heartbeat;

/// Period of the orphaned-interest prune.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error("Heartbeat multiplexer has stopped")]
    Stopped,
}

/// What the worker observed on one connection.
#[derive(Debug)]
enum Frame {
    Line(String),
    Invalid(String),
    Closed,
}

type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

enum Command {
    Watch {
        identity: AgentIdentity,
        connection: ConnectionId,
        frames: FrameStream,
    },
    Forget {
        connection: ConnectionId,
    },
}

/// Cloneable sender side of the multiplexer.
#[derive(Clone)]
pub struct MultiplexerHandle {
    commands: mpsc::UnboundedSender<Command>,
    watched: Arc<AtomicUsize>,
}

impl MultiplexerHandle {
    /// Start reading heartbeats from `frames` on behalf of `identity`.
    ///
    /// The worker adopts the stream only if the registry still holds `identity` on
    /// `connection` when the command is applied; otherwise the stream is dropped.
    pub fn watch<S>(
        &self,
        identity: AgentIdentity,
        connection: ConnectionId,
        frames: S,
    ) -> Result<(), MultiplexerError>
    where
        S: Stream<Item = Result<String, LinesCodecError>> + Send + 'static,
    {
        let frames = frames
            .map(|item| match item {
                Ok(line) => Frame::Line(line),
                Err(e) => Frame::Invalid(e.to_string()),
            })
            // StreamMap drops finished streams silently; surface the end explicitly.
            .chain(tokio_stream::once(Frame::Closed));

        self.commands
            .send(Command::Watch {
                identity,
                connection,
                frames: Box::pin(frames),
            })
            .map_err(|_| MultiplexerError::Stopped)
    }

    /// Number of connections currently watched.
    pub fn watched(&self) -> usize {
        self.watched.load(Ordering::Acquire)
    }
}

impl HeartbeatInterests for MultiplexerHandle {
    fn forget(&self, connection: ConnectionId) {
        // A stopped worker holds no interests.
        let _ = self.commands.send(Command::Forget { connection });
    }
}

/// Interest table plus the framed read sides it services.
#[derive(Default)]
struct Interests {
    identities: HashMap<ConnectionId, AgentIdentity>,
    streams: StreamMap<ConnectionId, FrameStream>,
}

impl Interests {
    fn insert(&mut self, identity: AgentIdentity, connection: ConnectionId, frames: FrameStream) {
        self.identities.insert(connection, identity);
        self.streams.insert(connection, frames);
    }

    /// Dropping the stream releases the read half of the socket.
    fn remove(&mut self, connection: ConnectionId) -> Option<AgentIdentity> {
        self.streams.remove(&connection);
        self.identities.remove(&connection)
    }

    fn len(&self) -> usize {
        debug_assert_eq!(self.identities.len(), self.streams.len());
        self.identities.len()
    }
}

pub struct HeartbeatMultiplexer {
    registry: Registry,
    poll_interval: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    watched: Arc<AtomicUsize>,
    shutdown_token: CancellationToken,
}

impl HeartbeatMultiplexer {
    pub fn new(registry: Registry, poll_interval: Duration) -> (Self, MultiplexerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = Arc::new(AtomicUsize::new(0));
        let multiplexer = Self {
            registry,
            poll_interval,
            commands: rx,
            watched: watched.clone(),
            shutdown_token: CancellationToken::new(),
        };
        let handle = MultiplexerHandle {
            commands: tx,
            watched,
        };
        (multiplexer, handle)
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting heartbeat multiplexer"
        );

        let mut interests = Interests::default();
        let mut commands_open = true;
        // Fires on schedule even while frames keep arriving.
        let mut prune = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!(watched = interests.len(), "Shutdown signal received, stopping heartbeat multiplexer");
                    break;
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(Command::Watch { identity, connection, frames }) => {
                        self.adopt(&mut interests, identity, connection, frames);
                    }
                    Some(Command::Forget { connection }) => {
                        if let Some(identity) = interests.remove(connection) {
                            debug!(%identity, %connection, "Heartbeat interest dropped");
                        }
                    }
                    None => commands_open = false,
                },
                Some((connection, frame)) = interests.streams.next(), if !interests.streams.is_empty() => {
                    self.on_frame(&mut interests, connection, frame);
                }
                _ = prune.tick() => {
                    self.prune(&mut interests);
                }
            }

            self.watched.store(interests.len(), Ordering::Release);
        }

        self.watched.store(0, Ordering::Release);
    }

    fn adopt(
        &self,
        interests: &mut Interests,
        identity: AgentIdentity,
        connection: ConnectionId,
        frames: FrameStream,
    ) {
        if !self.registry.owns(&identity, connection) {
            debug!(%identity, %connection, "Registration gone before watch, dropping connection");
            return;
        }
        debug!(%identity, %connection, "Watching heartbeats");
        interests.insert(identity, connection, frames);
    }

    fn on_frame(&self, interests: &mut Interests, connection: ConnectionId, frame: Frame) {
        let Some(identity) = interests.identities.get(&connection).copied() else {
            interests.streams.remove(&connection);
            return;
        };

        let reason = match frame {
            Frame::Line(line) if is_heartbeat(&line) => {
                match self.registry.beat_session(&identity, connection) {
                    Ok(()) => debug!(%identity, "Heartbeat"),
                    Err(RegistryError::NotFound(_)) => {
                        debug!(%identity, %connection, "Heartbeat for removed registration, dropping interest");
                        interests.remove(connection);
                    }
                    Err(e) => warn!(%identity, error = %e, "Unexpected registry error on heartbeat"),
                }
                return;
            }
            Frame::Line(line) => format!("unexpected heartbeat line {:?}", truncate(&line)),
            Frame::Invalid(error) => format!("unreadable heartbeat: {}", error),
            Frame::Closed => "connection closed by agent".to_string(),
        };

        warn!(%identity, %connection, %reason, "Heartbeat lost, evicting agent");
        interests.remove(connection);
        self.registry.evict(&identity, connection);
    }

    /// Drop interests whose registration was removed behind the worker's back.
    fn prune(&self, interests: &mut Interests) {
        let orphaned: Vec<ConnectionId> = interests
            .identities
            .iter()
            .filter(|(connection, identity)| !self.registry.owns(identity, **connection))
            .map(|(connection, _)| *connection)
            .collect();

        for connection in orphaned {
            if let Some(identity) = interests.remove(connection) {
                debug!(%identity, %connection, "Pruned orphaned heartbeat interest");
            }
        }
    }
}

fn truncate(line: &str) -> &str {
    const MAX: usize = 64;
    match line.char_indices().nth(MAX) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}
