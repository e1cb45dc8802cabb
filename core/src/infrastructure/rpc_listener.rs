// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent RPC Listener
//!
//! Serves dispatch requests on the port an agent advertised at registration. Each
//! connection carries exactly one request line and receives exactly one response line
//! before it is closed.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** TCP front end of the dispatch boundary

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::dispatch::Dispatcher;
use crate::domain::wire::{
    decode_line, encode_line, ActionRequest, ActionResponse, WireError, DEFAULT_MAX_LINE_LENGTH,
};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("No request received within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed before a request was sent")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct RpcListenerConfig {
    /// Serve connections on their own tasks instead of one after another
    pub concurrent: bool,

    pub request_timeout: Duration,

    pub max_line_length: usize,
}

impl Default for RpcListenerConfig {
    fn default() -> Self {
        Self {
            concurrent: false,
            request_timeout: Duration::from_secs(30),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

pub struct AgentRpcListener {
    listener: TcpListener,
    dispatcher: Arc<dyn Dispatcher>,
    config: RpcListenerConfig,
    shutdown_token: CancellationToken,
}

impl AgentRpcListener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        dispatcher: Arc<dyn Dispatcher>,
        config: RpcListenerConfig,
    ) -> Result<Self, RpcError> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            dispatcher,
            config,
            shutdown_token: CancellationToken::new(),
        })
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            addr = ?self.listener.local_addr().ok(),
            concurrent = self.config.concurrent,
            "Agent RPC listener accepting requests"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept RPC connection");
                        continue;
                    }
                },
            };
            debug!(%peer, "RPC connection accepted");

            if self.config.concurrent {
                let dispatcher = self.dispatcher.clone();
                let config = self.config.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(dispatcher.as_ref(), stream, &config).await {
                        warn!(%peer, error = %e, "RPC connection failed");
                    }
                });
            } else {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => break,
                    result = serve_connection(self.dispatcher.as_ref(), stream, &self.config) => {
                        if let Err(e) = result {
                            warn!(%peer, error = %e, "RPC connection failed");
                        }
                    }
                }
            }
        }

        info!("Agent RPC listener stopped");
    }
}

/// Read one request from `stream`, dispatch it and write back one response.
///
/// A request that cannot be decoded still gets an error response.
pub async fn serve_connection(
    dispatcher: &dyn Dispatcher,
    stream: TcpStream,
    config: &RpcListenerConfig,
) -> Result<(), RpcError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(config.max_line_length),
    );

    let response = match timeout(config.request_timeout, frames.next()).await {
        Err(_) => return Err(RpcError::Timeout(config.request_timeout)),
        Ok(None) => return Err(RpcError::Closed),
        Ok(Some(Err(e))) => {
            warn!(error = %e, "Unreadable RPC request");
            ActionResponse::error(format!("unreadable request: {}", e))
        }
        Ok(Some(Ok(line))) => match decode_line::<ActionRequest>(&line) {
            Err(e) => {
                warn!(error = %e, "Malformed RPC request");
                ActionResponse::error(e)
            }
            Ok(request) => {
                debug!(plugin = %request.plugin, action = %request.action, "RPC request");
                match dispatcher.dispatch(request).await {
                    Ok(result) => ActionResponse::Ok { result },
                    Err(e) => {
                        debug!(error = %e, "Dispatch failed");
                        ActionResponse::error(e)
                    }
                }
            }
        },
    };

    write_half
        .write_all(encode_line(&response)?.as_bytes())
        .await?;
    write_half.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dispatch::DispatchError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::io::AsyncReadExt;
    use tokio::sync::Notify;

    /// Echoes `arguments.value`, optionally parking on `gate` first.
    struct TestDispatcher {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Dispatcher for TestDispatcher {
        async fn dispatch(&self, request: ActionRequest) -> Result<Value, DispatchError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match request.action.as_str() {
                "value" => Ok(request.arguments.get("value").cloned().unwrap_or(Value::Null)),
                other => Err(DispatchError::NoAction {
                    plugin: request.plugin.clone(),
                    action: other.to_string(),
                }),
            }
        }
    }

    async fn call(addr: SocketAddr, line: &[u8]) -> ActionResponse {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(line).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        decode_line(&response).unwrap()
    }

    async fn start(dispatcher: TestDispatcher, config: RpcListenerConfig) -> (SocketAddr, CancellationToken) {
        let listener = AgentRpcListener::bind("127.0.0.1:0", Arc::new(dispatcher), config)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        listener.with_shutdown(token.clone()).start();
        (addr, token)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (addr, token) = start(TestDispatcher { gate: None }, RpcListenerConfig::default()).await;

        let response = call(
            addr,
            b"{\"plugin\":\"p\",\"action\":\"value\",\"arguments\":{\"value\":42}}\n",
        )
        .await;
        assert_eq!(response, ActionResponse::Ok { result: json!(42) });

        let response = call(addr, b"{\"plugin\":\"p\",\"action\":\"nope\",\"arguments\":{}}\n").await;
        assert!(matches!(response, ActionResponse::Error { message } if message.contains("nope")));
        token.cancel();
    }

    #[tokio::test]
    async fn test_decode_error_gets_error_response_and_listener_survives() {
        let (addr, token) = start(TestDispatcher { gate: None }, RpcListenerConfig::default()).await;

        let response = call(addr, b"{\"plugin\":\"p\",\"action\":\"value\"}\n").await;
        assert!(matches!(response, ActionResponse::Error { .. }));

        let response = call(addr, b"\x00\x01garbage\n").await;
        assert!(matches!(response, ActionResponse::Error { .. }));

        let response = call(
            addr,
            b"{\"plugin\":\"p\",\"action\":\"value\",\"arguments\":{\"value\":\"ok\"}}\n",
        )
        .await;
        assert_eq!(response, ActionResponse::Ok { result: json!("ok") });
        token.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_mode_serves_in_parallel() {
        let gate = Arc::new(Notify::new());
        let (addr, token) = start(
            TestDispatcher {
                gate: Some(gate.clone()),
            },
            RpcListenerConfig {
                concurrent: true,
                ..Default::default()
            },
        )
        .await;

        let request = b"{\"plugin\":\"p\",\"action\":\"value\",\"arguments\":{\"value\":1}}\n";
        let first = tokio::spawn(call(addr, request));
        let second = tokio::spawn(call(addr, request));

        // Both requests must be parked in dispatch at once for this to release both.
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.notify_waiters();

        let first = tokio::time::timeout(Duration::from_secs(2), first).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), second).await.unwrap().unwrap();
        assert_eq!(first, ActionResponse::Ok { result: json!(1) });
        assert_eq!(second, ActionResponse::Ok { result: json!(1) });
        token.cancel();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let config = RpcListenerConfig {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let err = serve_connection(&TestDispatcher { gate: None }, server, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
    }
}
