//! # Node Configuration
//!
//! Unified configuration for the node identity, storage, ledger bridge,
//! callback delivery and runtime parameters.
//!
//! ## Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `IDV_NODE_ID` | `node.node_id` |
//! | `IDV_ROLE` | `node.role` (`rp`, `idp`, `as`, `proxy`) |
//! | `IDV_PROXIED_NODES` | `node.proxied`, as `id:role,id:role` |
//! | `IDV_MASTER` | `node.master` |
//! | `IDV_DATA_DIR` | `storage.data_dir` |
//! | `IDV_CALLBACK_<KIND>_URL` | `callback.urls` (e.g. `IDV_CALLBACK_ERROR_URL`) |
//! | `IDV_CALLBACK_TIMEOUT_MS` | `callback.core.request_timeout_ms` |
//! | `IDV_CALLBACK_MAX_ATTEMPTS` | `callback.core.event_retry.max_attempts` |
//! | `IDV_CALLBACK_BACKOFF_MS` | initial backoff of both retry policies |
//! | `IDV_CALLBACK_MAX_BACKOFF_MS` | backoff cap of both retry policies |
//! | `IDV_LEDGER_QUERY_TIMEOUT_MS` | `ledger.query_timeout_ms` |
//! | `IDV_SHUTDOWN_GRACE_SECS` | `runtime.shutdown_grace_secs` |

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use idv_orchestration::{CallbackConfig, CallbackKind};
use shared_types::entities::{NodeId, NodeRole};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Node identity is empty.
    #[error("IDV_NODE_ID is not set")]
    MissingNodeId,

    /// An environment variable could not be parsed.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name
        var: String,
        /// Parse failure
        reason: String,
    },

    /// Proxy settings do not fit the role.
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),

    /// Only the master process is supported.
    #[error("Worker mode is not supported; run the node as master")]
    WorkerModeUnsupported,

    /// Core tunables rejected.
    #[error("Invalid core configuration: {0}")]
    Core(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Identity and role.
    pub node: NodeIdentityConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Callback delivery configuration.
    pub callback: CallbackSettings,
    /// Ledger bridge configuration.
    pub ledger: LedgerBridgeConfig,
    /// Runtime loop configuration.
    pub runtime: RuntimeConfig,
}

/// Node identity configuration.
#[derive(Debug, Clone)]
pub struct NodeIdentityConfig {
    /// Identity this node runs as.
    pub node_id: NodeId,
    /// Role of `node_id`.
    pub role: NodeRole,
    /// Identities fronted by a proxy, each with its own role.
    pub proxied: Vec<(NodeId, NodeRole)>,
    /// Master process flag.
    pub master: bool,
}

impl Default for NodeIdentityConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::from(""),
            role: NodeRole::Idp,
            proxied: Vec::new(),
            master: true,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the store snapshot.
    pub data_dir: PathBuf,
    /// Snapshot file name inside `data_dir`.
    pub file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            file_name: "node.db".to_string(),
        }
    }
}

impl StorageConfig {
    /// Full path of the store snapshot.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

/// Callback delivery configuration.
#[derive(Debug, Clone, Default)]
pub struct CallbackSettings {
    /// Core delivery tunables.
    pub core: CallbackConfig,
    /// Callback URLs registered at startup.
    ///
    /// A proxy registers them for every identity it fronts.
    pub urls: HashMap<CallbackKind, String>,
}

/// Ledger bridge configuration.
#[derive(Debug, Clone)]
pub struct LedgerBridgeConfig {
    /// Time to wait for a ledger query answer (milliseconds).
    pub query_timeout_ms: u64,
}

impl Default for LedgerBridgeConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
        }
    }
}

impl LedgerBridgeConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Runtime loop configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound for draining in-flight work at shutdown (seconds).
    pub shutdown_grace_secs: u64,
    /// Interval for mirroring core counters into Prometheus (seconds).
    pub metrics_interval_secs: u64,
    /// Shared bus capacity.
    pub bus_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: 10,
            metrics_interval_secs: 15,
            bus_capacity: shared_bus::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs.max(1))
    }
}

impl NodeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(node_id) = lookup("IDV_NODE_ID") {
            config.node.node_id = NodeId::new(node_id.trim());
        }
        if let Some(role) = lookup("IDV_ROLE") {
            config.node.role = parse("IDV_ROLE", &role)?;
        }
        if let Some(proxied) = lookup("IDV_PROXIED_NODES") {
            config.node.proxied = parse_proxied(&proxied)?;
        }
        if let Some(master) = lookup("IDV_MASTER") {
            config.node.master = parse_bool("IDV_MASTER", &master)?;
        }
        if let Some(dir) = lookup("IDV_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }

        for kind in CallbackKind::ALL {
            let var = format!("IDV_CALLBACK_{}_URL", kind.as_str().to_ascii_uppercase());
            if let Some(url) = lookup(&var).filter(|url| !url.trim().is_empty()) {
                config.callback.urls.insert(kind, url.trim().to_string());
            }
        }

        let core = &mut config.callback.core;
        if let Some(ms) = lookup("IDV_CALLBACK_TIMEOUT_MS") {
            core.request_timeout_ms = parse("IDV_CALLBACK_TIMEOUT_MS", &ms)?;
        }
        if let Some(attempts) = lookup("IDV_CALLBACK_MAX_ATTEMPTS") {
            core.event_retry.max_attempts = parse("IDV_CALLBACK_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(ms) = lookup("IDV_CALLBACK_BACKOFF_MS") {
            let ms = parse("IDV_CALLBACK_BACKOFF_MS", &ms)?;
            core.event_retry.initial_backoff_ms = ms;
            core.error_retry.initial_backoff_ms = ms;
        }
        if let Some(ms) = lookup("IDV_CALLBACK_MAX_BACKOFF_MS") {
            let ms = parse("IDV_CALLBACK_MAX_BACKOFF_MS", &ms)?;
            core.event_retry.max_backoff_ms = ms;
            core.error_retry.max_backoff_ms = ms;
        }

        if let Some(ms) = lookup("IDV_LEDGER_QUERY_TIMEOUT_MS") {
            config.ledger.query_timeout_ms = parse("IDV_LEDGER_QUERY_TIMEOUT_MS", &ms)?;
        }
        if let Some(secs) = lookup("IDV_SHUTDOWN_GRACE_SECS") {
            config.runtime.shutdown_grace_secs = parse("IDV_SHUTDOWN_GRACE_SECS", &secs)?;
        }

        Ok(config)
    }

    /// Check the configuration can run.
    ///
    /// # Returns
    ///
    /// Returns `Err` if:
    /// - the node identity is empty
    /// - a proxy fronts no identity, fronts another proxy, or a non-proxy
    ///   lists fronted identities
    /// - the process is not the master
    /// - core tunables are out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.node_id.as_str().is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        if !self.node.master {
            return Err(ConfigError::WorkerModeUnsupported);
        }

        match self.node.role {
            NodeRole::Proxy => {
                if self.node.proxied.is_empty() {
                    return Err(ConfigError::InvalidProxy(
                        "IDV_PROXIED_NODES is empty".into(),
                    ));
                }
                if let Some((id, _)) = self
                    .node
                    .proxied
                    .iter()
                    .find(|(_, role)| *role == NodeRole::Proxy)
                {
                    return Err(ConfigError::InvalidProxy(format!(
                        "{id} is a proxy and cannot be fronted"
                    )));
                }
            }
            _ if !self.node.proxied.is_empty() => {
                return Err(ConfigError::InvalidProxy(format!(
                    "role {} cannot front other nodes",
                    self.node.role
                )));
            }
            _ => {}
        }

        if self.ledger.query_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                var: "IDV_LEDGER_QUERY_TIMEOUT_MS".into(),
                reason: "must be positive".into(),
            });
        }
        self.callback
            .core
            .validate()
            .map_err(|e| ConfigError::Core(e.to_string()))
    }

    /// Every identity this node handles, with its role.
    pub fn hosted_roles(&self) -> HashMap<NodeId, NodeRole> {
        match self.node.role {
            NodeRole::Proxy => self.node.proxied.iter().cloned().collect(),
            role => HashMap::from([(self.node.node_id.clone(), role)]),
        }
    }
}

fn parse<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_proxied(value: &str) -> Result<Vec<(NodeId, NodeRole)>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, role) = entry.split_once(':').ok_or_else(|| ConfigError::InvalidValue {
                var: "IDV_PROXIED_NODES".into(),
                reason: format!("expected id:role, got {entry:?}"),
            })?;
            Ok((NodeId::new(id.trim()), parse("IDV_PROXIED_NODES", role)?))
        })
        .collect()
}
