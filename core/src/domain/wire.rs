// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wire messages
//!
//! Every message is one line of compact JSON terminated by `\n`. Compact JSON never
//! contains a raw newline, so line framing is always unambiguous. The heartbeat is the
//! bare token `OK`, not JSON.
//!
//! JSON is used instead of MessagePack because raw MessagePack bytes may contain `\n`
//! and would break the line framing.

use crate::domain::registration::RegistrationMetadata;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Liveness token written by agents on their registration connection.
pub const HEARTBEAT_TOKEN: &str = "OK";

/// Upper bound on a single framed line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// First and only structured message an agent sends on its registration connection.
///
/// Identity fields are deliberately absent; unknown fields (including any claimed
/// identity) are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub agent_dispatch_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

impl RegistrationRequest {
    pub fn into_metadata(self) -> RegistrationMetadata {
        RegistrationMetadata {
            dispatch_port: self.agent_dispatch_port,
            fqdn: self.fqdn,
        }
    }
}

/// Dispatcher → agent request. All three fields are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub plugin: String,
    pub action: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ActionRequest {
    pub fn new(plugin: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            action: action.into(),
            arguments: serde_json::Map::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }
}

/// Agent → dispatcher response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResponse {
    Ok { result: serde_json::Value },
    Error { message: String },
}

impl ActionResponse {
    pub fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

/// Serialize `message` as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, WireError> {
    let mut line = serde_json::to_string(message).map_err(WireError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (with or without its terminator).
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, WireError> {
    serde_json::from_str(line.trim()).map_err(WireError::Decode)
}

/// Whether `line` is exactly the heartbeat token, ignoring surrounding whitespace.
pub fn is_heartbeat(line: &str) -> bool {
    line.trim() == HEARTBEAT_TOKEN
}

/// Heartbeat token with its terminator, ready to write.
pub fn heartbeat_line() -> String {
    format!("{}\n", HEARTBEAT_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_request_ignores_claimed_identity() {
        let request: RegistrationRequest = decode_line(
            r#"{"agent_dispatch_port":9001,"fqdn":"db-1.internal","identity":"10.9.9.9"}"#,
        )
        .unwrap();
        assert_eq!(request.agent_dispatch_port, 9001);
        assert_eq!(request.fqdn.as_deref(), Some("db-1.internal"));

        let metadata = request.into_metadata();
        assert_eq!(metadata.dispatch_port, 9001);
    }

    #[test]
    fn test_registration_request_fqdn_is_optional() {
        let request: RegistrationRequest = decode_line("{\"agent_dispatch_port\":3001}\n").unwrap();
        assert_eq!(request.fqdn, None);
        assert_eq!(
            encode_line(&request).unwrap(),
            "{\"agent_dispatch_port\":3001}\n"
        );
    }

    #[test]
    fn test_action_request_requires_all_fields() {
        let missing_arguments = decode_line::<ActionRequest>(r#"{"plugin":"system","action":"ping"}"#);
        assert!(matches!(missing_arguments, Err(WireError::Decode(_))));

        let request: ActionRequest =
            decode_line(r#"{"plugin":"system","action":"echo","arguments":{"x":1}}"#).unwrap();
        assert_eq!(request.arguments.get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_encoded_lines_have_single_terminator() {
        let request = ActionRequest::new("system", "echo")
            .with_argument("text", json!("line one\nline two"));
        let line = encode_line(&request).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_response_tagging() {
        let ok = encode_line(&ActionResponse::Ok { result: json!("pong") }).unwrap();
        assert_eq!(ok, "{\"status\":\"ok\",\"result\":\"pong\"}\n");

        let err: ActionResponse = decode_line(r#"{"status":"error","message":"nope"}"#).unwrap();
        assert_eq!(err, ActionResponse::error("nope"));
    }

    #[test]
    fn test_heartbeat_token() {
        assert!(is_heartbeat("OK"));
        assert!(is_heartbeat("OK\r"));
        assert!(!is_heartbeat("garbage"));
        assert!(!is_heartbeat(""));
        assert!(!is_heartbeat("ok"));
        assert_eq!(heartbeat_line(), "OK\n");
    }
}
