// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for an ACP orchestrator node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - ACP server binding
// - Task dispatcher scheduling knobs (strategy, score weights, heartbeat threshold)
// - Trace bus sizing
//
// The core crates never read files themselves; the host loads a manifest and
// hands the typed sections to the server and dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "AcpNodeConfig";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown scheduling strategy '{0}'. Supported: round_robin, least_loaded, capability_match, random")]
    UnknownStrategy(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Agent selection policy for the task dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    RoundRobin,
    LeastLoaded,
    CapabilityMatch,
    Random,
}

impl SchedulingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastLoaded => "least_loaded",
            Self::CapabilityMatch => "capability_match",
            Self::Random => "random",
        }
    }
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        Self::CapabilityMatch
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "least_loaded" => Ok(Self::LeastLoaded),
            "capability_match" => Ok(Self::CapabilityMatch),
            "random" => Ok(Self::Random),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AcpNodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub trace: TraceSettings,
}

/// ACP WebSocket listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// 0 binds an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upgrade path for agent connections
    #[serde(default = "default_path")]
    pub path: String,

    /// Sender id stamped on frames the node produces itself (acks, errors)
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

impl ServerSettings {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            path: default_path(),
            node_id: default_node_id(),
        }
    }
}

/// Task dispatcher settings. Defaults score agents as
/// `0.7 x capability + 0.3 x free capacity`, 60s heartbeat window, 1s monitor tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default)]
    pub strategy: SchedulingStrategy,

    #[serde(default = "default_heartbeat_timeout_seconds")]
    pub heartbeat_timeout_seconds: u64,

    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    #[serde(default = "default_capability_weight")]
    pub capability_weight: f64,

    #[serde(default = "default_load_weight")]
    pub load_weight: f64,

    #[serde(default = "default_task_timeout_seconds")]
    pub default_timeout_seconds: u64,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Sender id on task and cancel messages
    #[serde(default = "default_dispatcher_id")]
    pub dispatcher_id: String,
}

impl DispatcherSettings {
    pub fn with_strategy(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor_interval_ms == 0 {
            return Err(ConfigError::Invalid("dispatcher.monitor_interval_ms must be > 0".into()));
        }
        if self.heartbeat_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("dispatcher.heartbeat_timeout_seconds must be > 0".into()));
        }
        for (name, weight) in [
            ("capability_weight", self.capability_weight),
            ("load_weight", self.load_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "dispatcher.{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.dispatcher_id.is_empty() {
            return Err(ConfigError::Invalid("dispatcher.dispatcher_id cannot be empty".into()));
        }
        Ok(())
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::default(),
            heartbeat_timeout_seconds: default_heartbeat_timeout_seconds(),
            monitor_interval_ms: default_monitor_interval_ms(),
            capability_weight: default_capability_weight(),
            load_weight: default_load_weight(),
            default_timeout_seconds: default_task_timeout_seconds(),
            default_max_retries: default_max_retries(),
            dispatcher_id: default_dispatcher_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSettings {
    /// Broadcast buffer before slow subscribers start lagging
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_path() -> String {
    "/acp".to_string()
}

fn default_node_id() -> String {
    "acp-gateway".to_string()
}

fn default_heartbeat_timeout_seconds() -> u64 {
    60
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

fn default_capability_weight() -> f64 {
    0.7
}

fn default_load_weight() -> f64 {
    0.3
}

fn default_task_timeout_seconds() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_dispatcher_id() -> String {
    "task-dispatcher".to_string()
}

fn default_channel_capacity() -> usize {
    1000
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "acp-node".to_string(),
                version: Some("1.0.0".to_string()),
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. ACP_CONFIG_PATH environment variable
    /// 2. ./acp-config.yaml (working directory)
    /// 3. ~/.acp/config.yaml (user home)
    /// 4. /etc/acp/config.yaml (system, Unix) or C:\ProgramData\Acp\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ACP_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./acp-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".acp").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/acp/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Acp\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path: fail if missing/invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    /// This allows container deployments to override config via env vars
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ACP_SCHEDULING_STRATEGY") {
            match val.parse::<SchedulingStrategy>() {
                Ok(strategy) => {
                    tracing::info!("Environment override: ACP_SCHEDULING_STRATEGY={}", strategy);
                    self.spec.dispatcher.strategy = strategy;
                }
                Err(e) => tracing::warn!("Ignoring ACP_SCHEDULING_STRATEGY: {}", e),
            }
        }

        if let Ok(val) = std::env::var("ACP_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: ACP_PORT={}", port);
                    self.spec.server.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for ACP_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Ok(val) = std::env::var("ACP_HEARTBEAT_TIMEOUT_SECONDS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: ACP_HEARTBEAT_TIMEOUT_SECONDS={}", secs);
                    self.spec.dispatcher.heartbeat_timeout_seconds = secs;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for ACP_HEARTBEAT_TIMEOUT_SECONDS: '{}'. Ignoring.",
                    val
                ),
            }
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

        if !self.spec.server.path.starts_with('/') {
            anyhow::bail!("spec.server.path must start with '/': {}", self.spec.server.path);
        }

        if self.spec.server.node_id.is_empty() {
            anyhow::bail!("spec.server.node_id cannot be empty");
        }

        if self.spec.trace.channel_capacity == 0 {
            anyhow::bail!("spec.trace.channel_capacity must be > 0");
        }

        self.spec.dispatcher.validate()?;

        Ok(())
    }
}
