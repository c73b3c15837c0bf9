//! WolfTopo Configuration
//!
//! This module provides configuration structures for the topology server
//! and admin tools.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::{RetryPolicy, StoreOptions, DEFAULT_KEY_PREFIX};
use crate::topology::{validate_identifier, TopologyOptions};

/// Main WolfTopo configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfTopoConfig {
    /// Which topology document to manage
    #[serde(default)]
    pub topology: TopologySection,

    /// KV backend configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Mutation retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Options for a document created from scratch
    #[serde(default)]
    pub bootstrap: TopologyOptions,
}

/// Topology selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySection {
    /// Document name
    #[serde(default = "default_topology_name")]
    pub name: String,
}

/// Supported KV backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// File-backed SQLite store
    #[default]
    Sqlite,
    /// Process-local store, lost on exit
    Memory,
}

/// KV backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Database file for the sqlite backend
    #[serde(default = "default_store_path")]
    pub path: Option<PathBuf>,

    /// Prefix of the document key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Mutation retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Compare-and-swap rounds before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Retries of a single backend call after a transport failure
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,

    /// Deadline for a whole mutation in milliseconds (0 = none)
    #[serde(default)]
    pub deadline_ms: u64,
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

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_topology_name() -> String {
    "default".to_string()
}

fn default_store_path() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/wolftopo/topology.db"))
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_max_attempts() -> u32 {
    16
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1000
}

fn default_transport_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TopologySection {
    fn default() -> Self {
        Self {
            name: default_topology_name(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: default_store_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            transport_retries: default_transport_retries(),
            deadline_ms: 0,
        }
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
            format: default_log_format(),
        }
    }
}

impl WolfTopoConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WolfTopoConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfTopoConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if !validate_identifier(&self.topology.name) {
            return Err(crate::Error::Config(format!(
                "topology.name '{}' is not a valid identifier",
                self.topology.name
            )));
        }

        if self.store.backend == Backend::Sqlite && self.store.path.is_none() {
            return Err(crate::Error::Config(
                "store.path is required for the sqlite backend".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config("retry.max_attempts must be at least 1".into()));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(crate::Error::Config(
                "retry.initial_backoff_ms cannot exceed retry.max_backoff_ms".into(),
            ));
        }

        if self.api.bind_address.is_empty() {
            return Err(crate::Error::Config("api.bind_address cannot be empty".into()));
        }

        crate::topology::validate::check_topology_options(&self.bootstrap)
            .map_err(|e| crate::Error::Config(format!("bootstrap: {}", e)))?;

        Ok(())
    }

    /// Get the mutation deadline, if any
    pub fn deadline(&self) -> Option<Duration> {
        match self.retry.deadline_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Build the retry policy for store handles
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            transport_retries: self.retry.transport_retries,
            deadline: self.deadline(),
        }
    }

    /// Build the options for store handles
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            key_prefix: self.store.key_prefix.clone(),
            retry: self.retry_policy(),
        }
    }

    /// Example configuration written by `wolftopo init`
    pub fn example() -> String {
        EXAMPLE_CONFIG.to_string()
    }
}

const EXAMPLE_CONFIG: &str = r#"# WolfTopo configuration

[topology]
name = "default"

[store]
backend = "sqlite"
path = "/var/lib/wolftopo/topology.db"
key_prefix = "/wolftopo/"

[retry]
max_attempts = 16
initial_backoff_ms = 10
max_backoff_ms = 1000
transport_retries = 3
deadline_ms = 0

[api]
enabled = true
bind_address = "0.0.0.0:8090"

[logging]
level = "info"
format = "pretty"

# Used only when the topology document is first created
[bootstrap]
bucket_count = 3000
rebalancer_disbalance_threshold = 1
rebalancer_max_receiving = 100
rebalancer_max_sending = 1
discovery_mode = "on"
sync_timeout = 1.0
collect_bucket_garbage_interval = 0.5
"#;
