// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use muster_core::application::plugins::PluginDispatcher;
use muster_core::domain::agent_state::AgentState;
use muster_core::domain::config::{AgentConfig, RegistryConfig, RpcConfig};
use muster_core::domain::registration::AgentIdentity;
use muster_core::domain::wire::{decode_line, ActionResponse};
use muster_core::infrastructure::{AgentNode, RegistrationServer};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn loopback() -> AgentIdentity {
    AgentIdentity::from("127.0.0.1".parse::<IpAddr>().unwrap())
}

fn registry_config(port: u16) -> RegistryConfig {
    RegistryConfig {
        bind_address: "127.0.0.1".to_string(),
        port,
        poll_interval_ms: 50,
        ..Default::default()
    }
}

fn agent_config(registry: SocketAddr) -> AgentConfig {
    AgentConfig {
        registry_host: registry.ip().to_string(),
        registry_port: registry.port(),
        dispatch_port: 0,
        heartbeat_interval_seconds: 1,
        retry_backoff_seconds: 1,
        advertise_fqdn: false,
    }
}

fn rpc_config() -> RpcConfig {
    RpcConfig {
        bind_address: "127.0.0.1".to_string(),
        ..Default::default()
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_state(states: &mut watch::Receiver<AgentState>, target: AgentState) {
    tokio::time::timeout(Duration::from_secs(10), states.wait_for(|s| *s == target))
        .await
        .expect("agent state not reached")
        .unwrap();
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn start_agent(registry: SocketAddr) -> AgentNode {
    AgentNode::start(
        &agent_config(registry),
        &rpc_config(),
        Arc::new(PluginDispatcher::with_system_plugin()),
        CancellationToken::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_agent_registers_and_advertises_bound_rpc_port() {
    let server = RegistrationServer::start(&registry_config(0)).await.unwrap();
    let node = start_agent(server.local_addr()).await;
    let mut states = node.subscribe();

    wait_for_state(&mut states, AgentState::Active).await;
    eventually("registration", || server.registry().get(&loopback()).is_some()).await;

    let snapshot = server.registry().get(&loopback()).unwrap();
    assert_eq!(snapshot.metadata.dispatch_port, node.rpc_addr().port());

    // The agent's immediate first heartbeat refreshes the entry.
    let registered = snapshot.last_heartbeat_at;
    eventually("heartbeat", || {
        server.registry().get(&loopback()).unwrap().last_heartbeat_at > registered
    })
    .await;

    node.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_agent_retries_until_server_appears() {
    let port = free_port().await;
    let registry_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let node = start_agent(registry_addr).await;
    let mut states = node.subscribe();
    wait_for_state(&mut states, AgentState::Registering).await;

    // At least one refused attempt before the server exists.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(node.state(), AgentState::Registering);

    let server = RegistrationServer::start(&registry_config(port)).await.unwrap();
    wait_for_state(&mut states, AgentState::Active).await;
    eventually("registration", || server.registry().get(&loopback()).is_some()).await;

    node.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_agent_reregisters_after_eviction() {
    let server = RegistrationServer::start(&registry_config(0)).await.unwrap();
    let node = start_agent(server.local_addr()).await;
    let mut states = node.subscribe();

    wait_for_state(&mut states, AgentState::Active).await;
    eventually("registration", || server.registry().get(&loopback()).is_some()).await;
    let first = server.registry().get(&loopback()).unwrap().connection;

    assert!(server.registry().remove(&loopback()));

    eventually("new session", || {
        server
            .registry()
            .get(&loopback())
            .is_some_and(|snapshot| snapshot.connection != first)
    })
    .await;
    wait_for_state(&mut states, AgentState::Active).await;

    node.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_agent_rpc_round_trip() {
    let server = RegistrationServer::start(&registry_config(0)).await.unwrap();
    let node = start_agent(server.local_addr()).await;

    let mut stream = TcpStream::connect(node.rpc_addr()).await.unwrap();
    stream
        .write_all(b"{\"plugin\":\"system\",\"action\":\"ping\",\"arguments\":{}}\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert_eq!(
        decode_line::<ActionResponse>(&response).unwrap(),
        ActionResponse::Ok { result: json!("pong") }
    );

    let mut stream = TcpStream::connect(node.rpc_addr()).await.unwrap();
    stream.write_all(b"{\"plugin\":\"system\"}\n").await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(matches!(
        decode_line::<ActionResponse>(&response).unwrap(),
        ActionResponse::Error { .. }
    ));

    node.shutdown().await;
    server.shutdown().await;
}
