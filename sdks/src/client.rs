// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use muster_core::domain::wire::{decode_line, encode_line, ActionRequest, ActionResponse, WireError};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Failed to connect to agent at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Agent closed the connection without responding")]
    NoResponse,

    #[error("Agent did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Agent returned an error: {0}")]
    Remote(String),
}

/// Client for an agent's RPC endpoint.
///
/// Every call opens a fresh connection, sends one request line and reads one response
/// line.
pub struct AgentRpcClient {
    addr: String,
    timeout: Duration,
}

impl AgentRpcClient {
    /// Create a client for the agent listening on `host:port`.
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self::with_addr(format!("{}:{}", host.as_ref(), port))
    }

    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Bound on connect plus the whole request/response exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Invoke `request` on the agent and return its result.
    pub async fn call(&self, request: &ActionRequest) -> Result<Value, SdkError> {
        let exchange = async {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|source| SdkError::Connect {
                    addr: self.addr.clone(),
                    source,
                })?;
            exchange(stream, request).await
        };

        timeout(self.timeout, exchange)
            .await
            .map_err(|_| SdkError::Timeout(self.timeout))?
    }

    /// Shorthand for `system.ping`.
    pub async fn ping(&self) -> Result<Value, SdkError> {
        self.call(&ActionRequest::new("system", "ping")).await
    }
}

/// One request/response exchange over an established stream.
pub async fn exchange<S>(stream: S, request: &ActionRequest) -> Result<Value, SdkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    stream
        .get_mut()
        .write_all(encode_line(request)?.as_bytes())
        .await?;

    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
        return Err(SdkError::NoResponse);
    }

    match decode_line::<ActionResponse>(&line)? {
        ActionResponse::Ok { result } => Ok(result),
        ActionResponse::Error { message } => Err(SdkError::Remote(message)),
    }
}
