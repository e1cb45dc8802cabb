// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer
//!
//! Pure types shared by the registration node and the agent node.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`registration`] | `AgentIdentity`, `ConnectionId`, `ConnectionHandle`, `AgentRegistration` |
//! | [`agent_state`] | `AgentState`, `AgentEvent` |
//! | [`wire`] | `RegistrationRequest`, `ActionRequest`, `ActionResponse` |
//! | [`dispatch`] | `Dispatcher`, `DispatchError` |
//! | [`config`] | `MusterConfig` |

pub mod agent_state;
pub mod config;
pub mod dispatch;
pub mod registration;
pub mod wire;
