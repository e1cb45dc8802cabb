// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the muster CLI

pub mod agent;
pub mod call;
pub mod config;
pub mod registry;

pub use self::agent::AgentArgs;
pub use self::call::CallArgs;
pub use self::config::ConfigCommand;
pub use self::registry::RegistryArgs;
