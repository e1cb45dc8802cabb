// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Registration Domain Types
//!
//! - [`AgentIdentity`] — registry key, always derived from the TCP peer address.
//! - [`ConnectionId`] — process-unique token naming one accepted registration connection.
//! - [`ConnectionHandle`] — the registry-owned write side of a registration connection.
//! - [`AgentRegistration`] — one live agent session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::time::Instant;

/// Registry key for an agent.
///
/// Built from the peer address of the registration connection. Whatever the agent
/// claims about itself in the payload is never consulted, so an agent cannot register
/// under an address it does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentIdentity(pub IpAddr);

impl AgentIdentity {
    /// Identity of the agent at the far end of a connection.
    ///
    /// IPv4-mapped IPv6 peers (dual-stack listeners) collapse to their IPv4 form so the
    /// same host always maps to the same key.
    pub fn from_peer(peer: SocketAddr) -> Self {
        Self(peer.ip().to_canonical())
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<IpAddr> for AgentIdentity {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_canonical())
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Token naming a single accepted registration connection.
///
/// Two sessions from the same identity always carry different ids, which is what lets
/// eviction paths target one session without touching its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry-owned side of a registration connection.
///
/// The read half lives in the heartbeat multiplexer; this handle keeps the write half.
/// Closing the handle (explicitly, or by dropping it) shuts the socket down for writing,
/// which the agent observes as end-of-stream.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    writer: Option<OwnedWriteHalf>,
}

impl ConnectionHandle {
    pub fn new(peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            writer: Some(writer),
        }
    }

    /// Handle with no socket behind it.
    #[cfg(test)]
    pub(crate) fn detached(peer: SocketAddr) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            writer: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) {
        // OwnedWriteHalf shuts down the write direction on drop.
        self.writer.take();
    }
}

/// What the agent advertised when it registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationMetadata {
    /// Port of the agent's RPC listener.
    pub dispatch_port: u16,

    /// Self-reported host name. Informational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

/// One live agent session.
#[derive(Debug)]
pub struct AgentRegistration {
    pub identity: AgentIdentity,
    pub connection: ConnectionHandle,
    pub metadata: RegistrationMetadata,
    /// Monotonic time of the most recent heartbeat (registration counts as one).
    pub last_heartbeat_at: Instant,
    pub registered_at: DateTime<Utc>,
}

impl AgentRegistration {
    pub fn new(
        identity: AgentIdentity,
        connection: ConnectionHandle,
        metadata: RegistrationMetadata,
    ) -> Self {
        Self {
            identity,
            connection,
            metadata,
            last_heartbeat_at: Instant::now(),
            registered_at: Utc::now(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn dispatch_port(&self) -> u16 {
        self.metadata.dispatch_port
    }

    /// Record a heartbeat observed at `now`.
    pub fn refresh(&mut self, now: Instant) {
        self.last_heartbeat_at = now;
    }

    /// Time since the last heartbeat, as seen at `now`.
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat_at)
    }

    /// Strictly older than `threshold`; an agent exactly at the threshold survives.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.silent_for(now) > threshold
    }

    pub fn snapshot(&self) -> RegistrationSnapshot {
        RegistrationSnapshot {
            identity: self.identity,
            connection: self.connection.id(),
            peer: self.connection.peer(),
            metadata: self.metadata.clone(),
            last_heartbeat_at: self.last_heartbeat_at,
            registered_at: self.registered_at,
        }
    }
}

/// Read-only copy of a registration, safe to hold outside the registry lock.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSnapshot {
    pub identity: AgentIdentity,
    pub connection: ConnectionId,
    pub peer: SocketAddr,
    pub metadata: RegistrationMetadata,
    pub last_heartbeat_at: Instant,
    pub registered_at: DateTime<Utc>,
}

/// A registration selected by a staleness scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleRegistration {
    pub identity: AgentIdentity,
    pub connection: ConnectionId,
    pub silent_for: Duration,
}
