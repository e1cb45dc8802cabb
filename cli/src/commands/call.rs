// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `muster call` - invoke an action on an agent

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use muster_sdk::{ActionRequest, AgentRpcClient, SdkError};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Agent host
    #[arg(value_name = "HOST")]
    pub host: String,

    /// Plugin name
    #[arg(value_name = "PLUGIN")]
    pub plugin: String,

    /// Action name
    #[arg(value_name = "ACTION")]
    pub action: String,

    /// Arguments as a JSON object
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub args: String,

    /// Agent RPC port (default: spec.agent.dispatch_port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for a response
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

impl CallArgs {
    pub fn request(&self) -> Result<ActionRequest> {
        let arguments: Map<String, Value> = serde_json::from_str(&self.args)
            .with_context(|| format!("--args must be a JSON object, got {}", self.args))?;
        Ok(ActionRequest {
            plugin: self.plugin.clone(),
            action: self.action.clone(),
            arguments,
        })
    }
}

pub async fn run(args: CallArgs, default_port: u16) -> Result<()> {
    let request = args.request()?;
    let client = AgentRpcClient::new(&args.host, args.port.unwrap_or(default_port))
        .with_timeout(Duration::from_secs(args.timeout));

    match client.call(&request).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(SdkError::Remote(message)) => {
            eprintln!("{} {}", "✗".red(), message.red());
            anyhow::bail!("{}.{} failed on {}", args.plugin, args.action, client.addr())
        }
        Err(e) => Err(e).with_context(|| format!("Call to {} failed", client.addr())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(json_args: &str) -> CallArgs {
        CallArgs {
            host: "localhost".to_string(),
            plugin: "system".to_string(),
            action: "echo".to_string(),
            args: json_args.to_string(),
            port: None,
            timeout: 30,
        }
    }

    #[test]
    fn test_request_from_args() {
        let request = args(r#"{"x": 1}"#).request().unwrap();
        assert_eq!(request.plugin, "system");
        assert_eq!(request.action, "echo");
        assert_eq!(request.arguments.get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_non_object_args_rejected() {
        assert!(args("[1, 2]").request().is_err());
        assert!(args("not json").request().is_err());
    }
}
