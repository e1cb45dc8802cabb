// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registry - the membership table of a registration node
//!
//! Single source of truth for which agents are alive. Registration handlers, the
//! heartbeat multiplexer and the culling sweeper all mutate it concurrently, so every
//! operation runs under one mutex and never awaits while holding it.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Serialized register / beat / remove / stale-selection over live sessions

use crate::domain::registration::{
    AgentIdentity, AgentRegistration, ConnectionId, RegistrationSnapshot, StaleRegistration,
};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The identity already has a live session. The rejected registration is handed
    /// back so the caller can retry with the same connection.
    #[error("{identity} tried to double register (live session {existing})")]
    DoubleRegistration {
        identity: AgentIdentity,
        existing: ConnectionId,
        rejected: Box<AgentRegistration>,
    },

    #[error("No registration for {0}")]
    NotFound(AgentIdentity),
}

/// Shared, cloneable handle to the membership table.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<Mutex<HashMap<AgentIdentity, AgentRegistration>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. Never overwrites a live one.
    pub fn register(&self, registration: AgentRegistration) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        match entries.entry(registration.identity) {
            Entry::Occupied(existing) => Err(RegistryError::DoubleRegistration {
                identity: registration.identity,
                existing: existing.get().connection_id(),
                rejected: Box::new(registration),
            }),
            Entry::Vacant(slot) => {
                debug!(
                    identity = %registration.identity,
                    connection = %registration.connection_id(),
                    "Registry entry created"
                );
                slot.insert(registration);
                Ok(())
            }
        }
    }

    /// Refresh the heartbeat timestamp of `identity`.
    pub fn beat(&self, identity: &AgentIdentity) -> Result<(), RegistryError> {
        self.beat_at(identity, Instant::now())
    }

    pub fn beat_at(&self, identity: &AgentIdentity, now: Instant) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        match entries.get_mut(identity) {
            Some(registration) => {
                registration.refresh(now);
                Ok(())
            }
            None => Err(RegistryError::NotFound(*identity)),
        }
    }

    /// Refresh `identity` only while it is still registered on `connection`.
    ///
    /// A heartbeat read from a superseded connection must not keep the newer session
    /// alive, so that case reports `NotFound` like a missing entry.
    pub fn beat_session(
        &self,
        identity: &AgentIdentity,
        connection: ConnectionId,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        match entries.get_mut(identity) {
            Some(registration) if registration.connection_id() == connection => {
                registration.refresh(Instant::now());
                Ok(())
            }
            _ => Err(RegistryError::NotFound(*identity)),
        }
    }

    /// Remove whatever session `identity` has and close its connection.
    ///
    /// Idempotent: returns `false` when there was nothing to remove.
    pub fn remove(&self, identity: &AgentIdentity) -> bool {
        let removed = self.entries.lock().remove(identity);
        Self::close_removed(removed)
    }

    /// Remove the session of `identity` only if it is still the one on `connection`.
    ///
    /// Eviction decisions are made against a specific session; if the agent has since
    /// re-registered on a new connection, the new session is left alone.
    pub fn evict(&self, identity: &AgentIdentity, connection: ConnectionId) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(identity) {
                Some(current) if current.connection_id() == connection => entries.remove(identity),
                _ => None,
            }
        };
        Self::close_removed(removed)
    }

    /// Sessions whose last heartbeat is strictly older than `threshold` at `now`.
    ///
    /// Taken under the lock, so the result is one consistent snapshot.
    pub fn select_stale(&self, now: Instant, threshold: Duration) -> Vec<StaleRegistration> {
        let entries = self.entries.lock();
        let mut stale: Vec<StaleRegistration> = entries
            .values()
            .filter(|registration| registration.is_stale(now, threshold))
            .map(|registration| StaleRegistration {
                identity: registration.identity,
                connection: registration.connection_id(),
                silent_for: registration.silent_for(now),
            })
            .collect();
        stale.sort_by_key(|entry| entry.identity);
        stale
    }

    /// Whether `identity` is currently registered on `connection`.
    pub fn owns(&self, identity: &AgentIdentity, connection: ConnectionId) -> bool {
        self.entries
            .lock()
            .get(identity)
            .is_some_and(|registration| registration.connection_id() == connection)
    }

    pub fn get(&self, identity: &AgentIdentity) -> Option<RegistrationSnapshot> {
        self.entries.lock().get(identity).map(AgentRegistration::snapshot)
    }

    pub fn list(&self) -> Vec<RegistrationSnapshot> {
        let mut snapshots: Vec<_> = self
            .entries
            .lock()
            .values()
            .map(AgentRegistration::snapshot)
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.identity);
        snapshots
    }

    pub fn identities(&self) -> Vec<AgentIdentity> {
        let mut identities: Vec<_> = self.entries.lock().keys().copied().collect();
        identities.sort();
        identities
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    // Runs after the lock is released.
    fn close_removed(removed: Option<AgentRegistration>) -> bool {
        match removed {
            Some(mut registration) => {
                registration.connection.close();
                info!(
                    identity = %registration.identity,
                    connection = %registration.connection_id(),
                    "Registration removed and connection closed"
                );
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registration::{ConnectionHandle, RegistrationMetadata};
    use std::net::SocketAddr;

    fn registration(peer: &str, dispatch_port: u16) -> AgentRegistration {
        let peer: SocketAddr = peer.parse().unwrap();
        AgentRegistration::new(
            AgentIdentity::from_peer(peer),
            ConnectionHandle::detached(peer),
            RegistrationMetadata {
                dispatch_port,
                fqdn: None,
            },
        )
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = Registry::new();
        let reg = registration("10.0.0.5:40000", 9001);
        let identity = reg.identity;
        registry.register(reg).unwrap();

        let snapshot = registry.get(&identity).unwrap();
        assert_eq!(snapshot.identity.to_string(), "10.0.0.5");
        assert_eq!(snapshot.metadata.dispatch_port, 9001);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_double_registration_is_rejected_not_overwritten() {
        let registry = Registry::new();
        let first = registration("10.0.0.5:40000", 9001);
        let first_connection = first.connection_id();
        registry.register(first).unwrap();

        let second = registration("10.0.0.5:40001", 9002);
        let second_connection = second.connection_id();
        match registry.register(second) {
            Err(RegistryError::DoubleRegistration {
                existing, rejected, ..
            }) => {
                assert_eq!(existing, first_connection);
                assert_eq!(rejected.connection_id(), second_connection);
                assert_eq!(rejected.dispatch_port(), 9002);
            }
            other => panic!("expected double registration, got {:?}", other),
        }

        let identity = AgentIdentity::from_peer("10.0.0.5:1".parse().unwrap());
        assert_eq!(registry.get(&identity).unwrap().metadata.dispatch_port, 9001);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_beat_unknown_identity() {
        let registry = Registry::new();
        let identity = AgentIdentity::from_peer("10.0.0.9:1".parse().unwrap());
        assert!(matches!(
            registry.beat(&identity),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = Registry::new();
        let reg = registration("10.0.0.5:40000", 9001);
        let identity = reg.identity;
        registry.register(reg).unwrap();

        assert!(registry.remove(&identity));
        assert!(!registry.remove(&identity));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.beat(&identity),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_evict_spares_newer_session() {
        let registry = Registry::new();
        let old = registration("10.0.0.5:40000", 9001);
        let identity = old.identity;
        let old_connection = old.connection_id();
        registry.register(old).unwrap();
        assert!(registry.remove(&identity));

        let new = registration("10.0.0.5:40001", 9001);
        let new_connection = new.connection_id();
        registry.register(new).unwrap();

        assert!(!registry.evict(&identity, old_connection));
        assert!(registry.owns(&identity, new_connection));
        assert!(registry.evict(&identity, new_connection));
        assert!(!registry.owns(&identity, new_connection));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_stale_threshold_is_strict() {
        let registry = Registry::new();
        let quiet = registration("10.0.0.5:40000", 9001);
        let quiet_identity = quiet.identity;
        registry.register(quiet).unwrap();

        let chatty = registration("10.0.0.6:40000", 9001);
        let chatty_identity = chatty.identity;
        registry.register(chatty).unwrap();

        let threshold = Duration::from_secs(300);
        let start = Instant::now();

        tokio::time::advance(Duration::from_secs(200)).await;
        registry.beat(&chatty_identity).unwrap();

        assert!(registry.select_stale(start + threshold, threshold).is_empty());

        let stale = registry.select_stale(start + threshold + Duration::from_secs(1), threshold);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].identity, quiet_identity);
        assert_eq!(stale[0].silent_for, Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_heartbeats_never_go_stale() {
        let registry = Registry::new();
        let reg = registration("10.0.0.5:40000", 9001);
        let identity = reg.identity;
        registry.register(reg).unwrap();

        let threshold = Duration::from_secs(300);
        let mut previous = registry.get(&identity).unwrap().last_heartbeat_at;

        // Ten minutes of beats every five seconds.
        for _ in 0..120 {
            tokio::time::advance(Duration::from_secs(5)).await;
            registry.beat(&identity).unwrap();

            let current = registry.get(&identity).unwrap().last_heartbeat_at;
            assert!(current > previous);
            previous = current;
            assert!(registry.select_stale(Instant::now(), threshold).is_empty());
        }
    }

    #[tokio::test]
    async fn test_concurrent_registrations_leave_single_entry() {
        let registry = Registry::new();
        let mut handles = Vec::new();

        for port in 0..16u16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let reg = registration(&format!("10.0.0.5:{}", 40000 + port), 9001);
                registry.register(reg).is_ok()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_beat_racing_remove_never_resurrects() {
        let registry = Registry::new();
        let reg = registration("10.0.0.5:40000", 9001);
        let identity = reg.identity;
        registry.register(reg).unwrap();

        let beater = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..1000 {
                    let _ = registry.beat(&identity);
                    tokio::task::yield_now().await;
                }
            })
        };
        let remover = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.remove(&identity) })
        };

        beater.await.unwrap();
        remover.await.unwrap();

        assert!(registry.get(&identity).is_none());
        assert!(matches!(
            registry.beat(&identity),
            Err(RegistryError::NotFound(_))
        ));
    }
}
