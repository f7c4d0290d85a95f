//! WolfRelay Configuration
//!
//! This module provides configuration structures for a relay node.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::replication::{ReplicationConfig, ReplicationMode};

/// Main WolfRelay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Replication configuration
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Stages in front of replication
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Address to bind for RPC traffic
    pub bind_address: String,

    /// Advertised address for other nodes to connect
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Timeout for establishing peer connections in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Interceptors installed in front of the replication stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Log every call and its outcome
    #[serde(default = "default_true")]
    pub log_requests: bool,

    /// Per-call time limit in milliseconds (0 = none)
    #[serde(default)]
    pub request_timeout_ms: u64,

    /// Artificial delay before each call in milliseconds (0 = none)
    #[serde(default)]
    pub delay_ms: u64,

    /// Keys whose reads, writes and deletes are refused
    #[serde(default)]
    pub rejected_keys: Vec<String>,

    /// Entries stamped onto every request's metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl LoggingConfig {
    /// Level to log at, preferring an explicit override
    pub fn resolve<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.level)
    }
}

// Default value functions
fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:7654".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "node-1".to_string(),
            bind_address: default_bind_address(),
            advertise_address: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_requests: true,
            request_timeout_ms: 0,
            delay_ms: 0,
            rejected_keys: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn delay(&self) -> Option<Duration> {
        (self.delay_ms > 0).then(|| Duration::from_millis(self.delay_ms))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            replication: ReplicationConfig::default(),
            pipeline: PipelineConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Single-node configuration with the given id
    pub fn for_node(id: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.node.id = id.into();
        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        let replication = &self.replication;
        if replication.method.is_empty() {
            return Err(crate::Error::Config("replication.method cannot be empty".into()));
        }

        if replication.per_call_timeout_ms == 0 || replication.broadcast_timeout_ms == 0 {
            return Err(crate::Error::Config("replication timeouts must be non-zero".into()));
        }

        if replication.cache_capacity == 0 {
            return Err(crate::Error::Config("replication.cache_capacity must be non-zero".into()));
        }

        let own = [self.node.bind_address.as_str(), self.advertise_address()];
        if let Some(peer) = replication.peers.iter().find(|p| own.contains(&p.as_str())) {
            return Err(crate::Error::Config(format!(
                "replication.peers must not include this node ({})",
                peer
            )));
        }

        if self.pipeline.metadata.keys().any(|k| k.is_empty()) {
            return Err(crate::Error::Config("pipeline.metadata keys cannot be empty".into()));
        }

        if replication.mode == ReplicationMode::Dedup && replication.key_prefix.is_some() {
            tracing::warn!("replication.key_prefix is only used in selective mode");
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.node.connect_timeout_ms)
    }
}
