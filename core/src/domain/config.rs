// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Muster Configuration Types
//
// Defines the configuration schema shared by registration nodes and agent nodes:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Registration node settings (port, staleness threshold, culling period)
// - Agent settings (registration target, dispatch port, heartbeat and retry timing)
// - RPC listener and logging settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "muster/v1";
pub const KIND: &str = "MusterConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusterConfig {
    /// API version (must be "muster/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "MusterConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: MusterConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusterConfigSpec {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Registration node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Registration port
    #[serde(default = "default_registry_port")]
    pub port: u16,

    /// Registrations silent for longer than this are culled
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_seconds: u64,

    /// Period of the culling sweep
    #[serde(default = "default_cull_interval")]
    pub cull_interval_seconds: u64,

    /// Upper bound on one wait of the heartbeat multiplexer
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Retries after a double registration before the attempt is refused
    #[serde(default = "default_max_registration_retries")]
    pub max_registration_retries: u32,

    /// Time allowed for the registration message to arrive
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,

    /// Longest accepted line on a registration connection, in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Agent node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_registry_host")]
    pub registry_host: String,

    #[serde(default = "default_registry_port")]
    pub registry_port: u16,

    /// Port of the local RPC listener, advertised at registration. 0 picks a free port.
    #[serde(default = "default_dispatch_port")]
    pub dispatch_port: u16,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Fixed wait between registration attempts
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_seconds: u64,

    /// Send the local host name along with the registration
    #[serde(default = "default_true")]
    pub advertise_fqdn: bool,
}

/// Agent RPC listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Serve requests on parallel tasks instead of one at a time
    #[serde(default)]
    pub concurrent: bool,

    /// Time allowed for a request line to arrive
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_registry_host() -> String {
    "localhost".to_string()
}

fn default_registry_port() -> u16 {
    3000
}

fn default_dispatch_port() -> u16 {
    3001
}

fn default_stale_threshold() -> u64 {
    300
}

fn default_cull_interval() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_registration_retries() -> u32 {
    3
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_line_length() -> usize {
    crate::domain::wire::DEFAULT_MAX_LINE_LENGTH
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_retry_backoff() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_registry_port(),
            stale_threshold_seconds: default_stale_threshold(),
            cull_interval_seconds: default_cull_interval(),
            poll_interval_ms: default_poll_interval(),
            max_registration_retries: default_max_registration_retries(),
            handshake_timeout_seconds: default_handshake_timeout(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl RegistryConfig {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }

    pub fn cull_interval(&self) -> Duration {
        Duration::from_secs(self.cull_interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            registry_host: default_registry_host(),
            registry_port: default_registry_port(),
            dispatch_port: default_dispatch_port(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            retry_backoff_seconds: default_retry_backoff(),
            advertise_fqdn: true,
        }
    }
}

impl AgentConfig {
    pub fn registry_address(&self) -> String {
        format!("{}:{}", self.registry_host, self.registry_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            concurrent: false,
            request_timeout_seconds: default_request_timeout(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MusterConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "muster-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: MusterConfigSpec::default(),
        }
    }
}

impl MusterConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. MUSTER_CONFIG_PATH environment variable
    /// 2. ./muster-config.yaml (working directory)
    /// 3. ~/.muster/config.yaml (user home)
    /// 4. /etc/muster/config.yaml (system, Unix) or C:\ProgramData\Muster\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MUSTER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./muster-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".muster").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/muster/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Muster\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup` (the process environment in production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = parse_port(&lookup, "MUSTER_REGISTRY_PORT") {
            tracing::info!("Environment override: MUSTER_REGISTRY_PORT={}", port);
            self.spec.registry.port = port;
            self.spec.agent.registry_port = port;
        }

        if let Some(host) = lookup("MUSTER_REGISTRY_HOST") {
            if host.is_empty() {
                tracing::warn!("Ignoring empty MUSTER_REGISTRY_HOST");
            } else {
                tracing::info!("Environment override: MUSTER_REGISTRY_HOST={}", host);
                self.spec.agent.registry_host = host;
            }
        }

        if let Some(port) = parse_port(&lookup, "MUSTER_DISPATCH_PORT") {
            tracing::info!("Environment override: MUSTER_DISPATCH_PORT={}", port);
            self.spec.agent.dispatch_port = port;
        }

        if let Some(level) = lookup("MUSTER_LOG_LEVEL") {
            self.spec.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let registry = &self.spec.registry;
        if registry.port == 0 {
            anyhow::bail!("spec.registry.port cannot be 0");
        }
        if registry.cull_interval_seconds == 0 {
            anyhow::bail!("spec.registry.cull_interval_seconds must be positive");
        }
        if registry.poll_interval_ms == 0 {
            anyhow::bail!("spec.registry.poll_interval_ms must be positive");
        }
        if registry.max_registration_retries == 0 {
            anyhow::bail!("spec.registry.max_registration_retries must be at least 1");
        }
        if registry.handshake_timeout_seconds == 0 {
            anyhow::bail!("spec.registry.handshake_timeout_seconds must be positive");
        }
        if registry.max_line_length == 0 {
            anyhow::bail!("spec.registry.max_line_length must be positive");
        }

        let agent = &self.spec.agent;
        if agent.registry_host.is_empty() {
            anyhow::bail!("spec.agent.registry_host cannot be empty");
        }
        // dispatch_port 0 binds an ephemeral port, which is then advertised.
        if agent.registry_port == 0 {
            anyhow::bail!("spec.agent.registry_port cannot be 0");
        }
        if agent.heartbeat_interval_seconds == 0 {
            anyhow::bail!("spec.agent.heartbeat_interval_seconds must be positive");
        }
        if agent.retry_backoff_seconds == 0 {
            anyhow::bail!("spec.agent.retry_backoff_seconds must be positive");
        }

        if registry.stale_threshold_seconds <= agent.heartbeat_interval_seconds {
            anyhow::bail!(
                "spec.registry.stale_threshold_seconds ({}) must exceed spec.agent.heartbeat_interval_seconds ({})",
                registry.stale_threshold_seconds,
                agent.heartbeat_interval_seconds
            );
        }

        if self.spec.rpc.request_timeout_seconds == 0 || self.spec.rpc.max_line_length == 0 {
            anyhow::bail!("spec.rpc timeouts and line limits must be positive");
        }

        match self.spec.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("Invalid logging format '{}'. Expected 'text' or 'json'", other),
        }

        Ok(())
    }
}

fn parse_port(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u16> {
    let raw = lookup(key)?;
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Some(port),
        _ => {
            tracing::warn!("Invalid value for {}: '{}'. Expected a port number. Ignoring.", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = MusterConfig::default();
        assert_eq!(config.api_version, "muster/v1");
        assert_eq!(config.kind, "MusterConfig");
        assert!(!config.metadata.name.is_empty());
        assert_eq!(config.spec.registry.port, 3000);
        assert_eq!(config.spec.registry.stale_threshold(), Duration::from_secs(300));
        assert_eq!(config.spec.registry.cull_interval(), Duration::from_secs(120));
        assert_eq!(config.spec.agent.dispatch_port, 3001);
        assert_eq!(config.spec.agent.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.spec.agent.retry_backoff(), Duration::from_secs(5));
        assert!(!config.spec.rpc.concurrent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
apiVersion: muster/v1
kind: MusterConfig
metadata:
  name: edge-7
spec:
  registry:
    port: 4100
  agent:
    registry_host: registrar.internal
"#;
        let config = MusterConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "edge-7");
        assert_eq!(config.spec.registry.port, 4100);
        assert_eq!(config.spec.registry.max_registration_retries, 3);
        assert_eq!(config.spec.agent.registry_address(), "registrar.internal:3000");
        assert_eq!(config.spec.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster-config.yaml");

        let mut config = MusterConfig::default();
        config.metadata.name = "registrar-1".to_string();
        config.spec.rpc.concurrent = true;
        config.to_yaml_file(&path).unwrap();

        let loaded = MusterConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "registrar-1");
        assert!(loaded.spec.rpc.concurrent);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(MusterConfig::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = MusterConfig::default();
        config.apply_overrides_from(|key| match key {
            "MUSTER_REGISTRY_PORT" => Some("4200".to_string()),
            "MUSTER_REGISTRY_HOST" => Some("10.0.0.1".to_string()),
            "MUSTER_DISPATCH_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });

        assert_eq!(config.spec.registry.port, 4200);
        assert_eq!(config.spec.agent.registry_port, 4200);
        assert_eq!(config.spec.agent.registry_host, "10.0.0.1");
        assert_eq!(config.spec.agent.dispatch_port, 3001);
    }

    #[test]
    fn test_validation() {
        let mut config = MusterConfig::default();
        assert!(config.validate().is_ok());

        config.api_version = "wrong/v1".to_string();
        assert!(config.validate().is_err());
        config.api_version = API_VERSION.to_string();

        config.kind = "WrongKind".to_string();
        assert!(config.validate().is_err());
        config.kind = KIND.to_string();

        config.metadata.name = "".to_string();
        assert!(config.validate().is_err());
        config.metadata.name = "node".to_string();

        config.spec.registry.max_registration_retries = 0;
        assert!(config.validate().is_err());
        config.spec.registry.max_registration_retries = 3;

        config.spec.registry.stale_threshold_seconds = 5;
        assert!(config.validate().is_err());
        config.spec.registry.stale_threshold_seconds = 300;

        config.spec.agent.registry_port = 0;
        assert!(config.validate().is_err());
        config.spec.agent.registry_port = 3000;

        config.spec.agent.dispatch_port = 0;
        assert!(config.validate().is_ok());
        config.spec.agent.dispatch_port = 3001;

        config.spec.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
        config.spec.logging.format = "json".to_string();

        assert!(config.validate().is_ok());
    }
}
