// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dispatch boundary
//!
//! The agent's RPC listener hands every decoded [`ActionRequest`] to a [`Dispatcher`]
//! and writes back whatever it returns. What an action actually does is up to the
//! dispatcher implementation.

use crate::domain::wire::ActionRequest;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Plugin '{0}' does not exist")]
    NoPlugin(String),

    #[error("Plugin '{plugin}' has no action '{action}'")]
    NoAction { plugin: String, action: String },

    #[error("Plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Action failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: ActionRequest) -> Result<serde_json::Value, DispatchError>;
}
