// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
/// muster Rust SDK
///
/// Call actions on registered agents from a dispatcher.

pub mod client;

pub use client::{AgentRpcClient, SdkError};
pub use muster_core::domain::wire::{ActionRequest, ActionResponse};
