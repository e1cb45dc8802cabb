// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `muster-core` — Agent Registration & Failure Detection
//!
//! Agents register with a central registration node over TCP, prove liveness by
//! writing a heartbeat token on the same connection, and expose an RPC endpoint that
//! dispatchers invoke.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | identities, registrations, agent state, wire messages, config |
//! | [`application`] | Application | `Registry`, `CullingSweeper`, `PluginDispatcher` |
//! | [`infrastructure`] | Infrastructure | multiplexer, listeners, agent state machine |
//!
//! ## Workers
//!
//! A registration node runs one accept loop (spawning a short-lived task per inbound
//! registration), exactly one [`infrastructure::multiplexer::HeartbeatMultiplexer`] and
//! exactly one [`application::sweeper::CullingSweeper`]. All three share the
//! [`application::registry::Registry`], which is the only shared mutable state.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
