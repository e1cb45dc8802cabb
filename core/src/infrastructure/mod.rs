// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Sockets and long-lived workers.
//!
//! | Module | Node | Contents |
//! |--------|------|----------|
//! | [`multiplexer`] | registration | `HeartbeatMultiplexer`, `MultiplexerHandle` |
//! | [`registration_listener`] | registration | `RegistrationListener`, `RegistrationHandler` |
//! | [`registration_server`] | registration | `RegistrationServer` |
//! | [`agent_client`] | agent | `AgentStateMachine` |
//! | [`rpc_listener`] | agent | `AgentRpcListener` |
//! | [`agent_node`] | agent | `AgentNode` |

pub mod agent_client;
pub mod agent_node;
pub mod multiplexer;
pub mod registration_listener;
pub mod registration_server;
pub mod rpc_listener;

pub use agent_node::AgentNode;
pub use registration_server::RegistrationServer;
