// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Plugin Dispatcher
//!
//! Default [`Dispatcher`] for agent nodes: a table of named plugins, each exposing
//! named actions. Requests are routed by `plugin` then `action`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Route RPC action requests to plugin implementations

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::dispatch::{DispatchError, Dispatcher};
use crate::domain::wire::ActionRequest;

/// Name and one-line description of an action a plugin exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn actions(&self) -> Vec<ActionDescriptor>;

    /// Run `action`. Only called for actions listed by [`Plugin::actions`].
    async fn invoke(
        &self,
        action: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, DispatchError>;
}

/// Table of plugins keyed by name.
#[derive(Default, Clone)]
pub struct PluginDispatcher {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher preloaded with the built-in `system` plugin.
    pub fn with_system_plugin() -> Self {
        let mut plugins: BTreeMap<String, Arc<dyn Plugin>> = BTreeMap::new();
        plugins.insert(SystemPlugin::NAME.to_string(), Arc::new(SystemPlugin));
        Self { plugins }
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), DispatchError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(DispatchError::DuplicatePlugin(name));
        }
        debug!(plugin = %name, "Plugin registered");
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Plugin name → descriptors of its actions.
    pub fn catalog(&self) -> BTreeMap<String, Vec<ActionDescriptor>> {
        self.plugins
            .iter()
            .map(|(name, plugin)| (name.clone(), plugin.actions()))
            .collect()
    }
}

#[async_trait]
impl Dispatcher for PluginDispatcher {
    async fn dispatch(&self, request: ActionRequest) -> Result<Value, DispatchError> {
        let plugin = self
            .plugins
            .get(&request.plugin)
            .ok_or_else(|| DispatchError::NoPlugin(request.plugin.clone()))?;

        if !plugin
            .actions()
            .iter()
            .any(|descriptor| descriptor.name == request.action)
        {
            return Err(DispatchError::NoAction {
                plugin: request.plugin,
                action: request.action,
            });
        }

        // The catalog lives here, not in the plugin.
        if request.plugin == SystemPlugin::NAME && request.action == SystemPlugin::PLUGINS {
            return Ok(json!(self.catalog()));
        }

        debug!(plugin = %request.plugin, action = %request.action, "Dispatching action");
        plugin.invoke(&request.action, &request.arguments).await
    }
}

/// Built-in plugin every agent carries.
///
/// - `ping` returns `"pong"`
/// - `echo` returns its arguments unchanged
/// - `plugins` lists every registered plugin with its actions. [`PluginDispatcher`]
///   answers it from its own table; invoked directly the plugin only knows itself.
pub struct SystemPlugin;

impl SystemPlugin {
    pub const NAME: &'static str = "system";
    const PLUGINS: &'static str = "plugins";
}

#[async_trait]
impl Plugin for SystemPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new("ping", "Liveness check, returns \"pong\""),
            ActionDescriptor::new("echo", "Returns the request arguments unchanged"),
            ActionDescriptor::new(Self::PLUGINS, "Lists registered plugins and their actions"),
        ]
    }

    async fn invoke(
        &self,
        action: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        match action {
            "ping" => Ok(json!("pong")),
            "echo" => Ok(Value::Object(arguments.clone())),
            // Reached only outside a PluginDispatcher, which intercepts this action.
            Self::PLUGINS => {
                let mut catalog = Map::new();
                catalog.insert(Self::NAME.to_string(), json!(self.actions()));
                Ok(Value::Object(catalog))
            }
            other => Err(DispatchError::NoAction {
                plugin: Self::NAME.to_string(),
                action: other.to_string(),
            }),
        }
    }
}
