//! # Node Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Command line (applied by the binary, highest priority)              │
//! │                                                                         │
//! │  2. Environment Variables                                               │
//! │     FUELLINE_NODE_ID=relay-north                                        │
//! │     FUELLINE_HUB_ADDR=10.0.0.5:65432                                    │
//! │                                                                         │
//! │  3. TOML Config File                                                    │
//! │     ~/.config/fuelline/node.toml (Linux)                                │
//! │     ~/Library/Application Support/com.fuelline.node/node.toml (macOS)   │
//! │                                                                         │
//! │  4. Default Values (lowest priority)                                    │
//! │     hub 127.0.0.1:65432, relay 127.0.0.1:65433, generated node id       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [node]
//! id = "relay-north"
//!
//! [network]
//! max_frame_len = 16777216
//!
//! [hub]
//! bind_addr = "127.0.0.1:65432"
//!
//! [relay]
//! bind_addr = "127.0.0.1:65433"
//! hub_addr = "127.0.0.1:65432"
//! reconnect_delay_ms = 5000
//! outbox_retention_days = 7
//! cleanup_interval_secs = 3600
//!
//! [leaf]
//! relay_addr = "127.0.0.1:65433"
//! reconnect_delay_ms = 3000
//! fuel_types = ["93", "95", "97", "Diesel", "Kerosene"]
//!
//! [storage]
//! database_path = "/var/lib/fuelline/relay-north.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::framer::DEFAULT_MAX_FRAME_LEN;
use fuelline_core::validation::validate_node_id;
use fuelline_core::FUEL_CATALOGUE;

/// Default hub listening address.
pub const DEFAULT_HUB_ADDR: &str = "127.0.0.1:65432";

/// Default relay listening address.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:65433";

// =============================================================================
// Node Role
// =============================================================================

/// Which tier this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Hub,
    Relay,
    Leaf,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Hub => write!(f, "hub"),
            NodeRole::Relay => write!(f, "relay"),
            NodeRole::Leaf => write!(f, "leaf"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hub" | "central" => Ok(NodeRole::Hub),
            "relay" | "distributor" => Ok(NodeRole::Relay),
            "leaf" | "pump" => Ok(NodeRole::Leaf),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown node role: '{}'. Valid options: hub, relay, leaf",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Identity of this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Stamped into heartbeats and transaction reports.
    /// Auto-generated if not provided.
    #[serde(default = "default_node_id")]
    pub id: String,
}

fn default_node_id() -> String {
    Uuid::new_v4().to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            id: default_node_id(),
        }
    }
}

/// Settings shared by every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Largest frame accepted from a peer, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            max_frame_len: default_max_frame_len(),
        }
    }
}

/// Hub server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_hub_addr")]
    pub bind_addr: String,
}

fn default_hub_addr() -> String {
    DEFAULT_HUB_ADDR.to_string()
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            bind_addr: default_hub_addr(),
        }
    }
}

/// Relay settings: where leaves reach us, and where we reach the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_relay_addr")]
    pub bind_addr: String,

    #[serde(default = "default_hub_addr")]
    pub hub_addr: String,

    /// Fixed wait between hub reconnect attempts.
    #[serde(default = "default_relay_reconnect")]
    pub reconnect_delay_ms: u64,

    /// Synced outbox records older than this are deleted.
    #[serde(default = "default_outbox_retention")]
    pub outbox_retention_days: u32,

    /// How often the outbox is pruned. Zero disables pruning.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_relay_addr() -> String {
    DEFAULT_RELAY_ADDR.to_string()
}

fn default_relay_reconnect() -> u64 {
    5_000
}

fn default_outbox_retention() -> u32 {
    7
}

fn default_cleanup_interval() -> u64 {
    3_600
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings {
            bind_addr: default_relay_addr(),
            hub_addr: default_hub_addr(),
            reconnect_delay_ms: default_relay_reconnect(),
            outbox_retention_days: default_outbox_retention(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl RelaySettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Leaf settings: upstream relay and sale simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafSettings {
    #[serde(default = "default_relay_addr")]
    pub relay_addr: String,

    /// Fixed wait between relay reconnect attempts.
    #[serde(default = "default_leaf_reconnect")]
    pub reconnect_delay_ms: u64,

    /// Run the periodic sale simulation.
    #[serde(default = "default_true")]
    pub simulate_sales: bool,

    /// Fuel types the simulation picks from.
    #[serde(default = "default_fuel_types")]
    pub fuel_types: Vec<String>,

    #[serde(default = "default_min_sale_interval")]
    pub min_sale_interval_secs: u64,

    #[serde(default = "default_max_sale_interval")]
    pub max_sale_interval_secs: u64,

    #[serde(default = "default_min_loading")]
    pub min_loading_secs: u64,

    #[serde(default = "default_max_loading")]
    pub max_loading_secs: u64,
}

fn default_leaf_reconnect() -> u64 {
    3_000
}
fn default_true() -> bool {
    true
}
fn default_fuel_types() -> Vec<String> {
    FUEL_CATALOGUE.iter().map(|s| s.to_string()).collect()
}
fn default_min_sale_interval() -> u64 {
    5
}
fn default_max_sale_interval() -> u64 {
    15
}
fn default_min_loading() -> u64 {
    3
}
fn default_max_loading() -> u64 {
    8
}

impl Default for LeafSettings {
    fn default() -> Self {
        LeafSettings {
            relay_addr: default_relay_addr(),
            reconnect_delay_ms: default_leaf_reconnect(),
            simulate_sales: default_true(),
            fuel_types: default_fuel_types(),
            min_sale_interval_secs: default_min_sale_interval(),
            max_sale_interval_secs: default_max_sale_interval(),
            min_loading_secs: default_min_loading(),
            max_loading_secs: default_max_loading(),
        }
    }
}

impl LeafSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Where the SQLite file lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Explicit path; when unset a per-node file in the platform data dir.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Node Configuration
// =============================================================================

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub leaf: LeafSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (node.toml)
    /// 3. Environment variables
    ///
    /// Validation is left to the caller so command-line overrides can be
    /// applied first.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading node config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        validate_node_id(&self.node.id).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        validate_addr("hub.bind_addr", &self.hub.bind_addr)?;
        validate_addr("relay.bind_addr", &self.relay.bind_addr)?;
        validate_addr("relay.hub_addr", &self.relay.hub_addr)?;
        validate_addr("leaf.relay_addr", &self.leaf.relay_addr)?;

        if self.network.max_frame_len == 0 {
            return Err(SyncError::InvalidConfig(
                "network.max_frame_len must be greater than 0".into(),
            ));
        }

        if self.leaf.fuel_types.is_empty() {
            return Err(SyncError::InvalidConfig(
                "leaf.fuel_types must not be empty".into(),
            ));
        }

        if self.leaf.min_sale_interval_secs > self.leaf.max_sale_interval_secs {
            return Err(SyncError::InvalidConfig(
                "leaf.min_sale_interval_secs exceeds leaf.max_sale_interval_secs".into(),
            ));
        }

        if self.leaf.min_loading_secs > self.leaf.max_loading_secs {
            return Err(SyncError::InvalidConfig(
                "leaf.min_loading_secs exceeds leaf.max_loading_secs".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup (the environment in production).
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("FUELLINE_NODE_ID") {
            debug!(node_id = %id, "Overriding node ID from environment");
            self.node.id = id;
        }

        if let Some(addr) = lookup("FUELLINE_HUB_ADDR") {
            debug!(addr = %addr, "Overriding relay upstream from environment");
            self.relay.hub_addr = addr;
        }

        if let Some(addr) = lookup("FUELLINE_HUB_BIND") {
            self.hub.bind_addr = addr;
        }

        if let Some(addr) = lookup("FUELLINE_RELAY_BIND") {
            self.relay.bind_addr = addr;
        }

        if let Some(addr) = lookup("FUELLINE_RELAY_ADDR") {
            debug!(addr = %addr, "Overriding leaf upstream from environment");
            self.leaf.relay_addr = addr;
        }

        if let Some(path) = lookup("FUELLINE_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(len) = lookup("FUELLINE_MAX_FRAME_LEN") {
            match len.parse::<usize>() {
                Ok(len) => self.network.max_frame_len = len,
                Err(_) => warn!(value = %len, "Ignoring unparseable FUELLINE_MAX_FRAME_LEN"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fuelline", "node")
            .map(|dirs| dirs.config_dir().join("node.toml"))
    }

    /// Resolves the database file for `role`.
    pub fn database_path(&self, role: NodeRole) -> PathBuf {
        if let Some(ref path) = self.storage.database_path {
            return path.clone();
        }

        let file = format!("{}-{}.db", role, self.node.id);
        match directories::ProjectDirs::from("com", "fuelline", "node") {
            Some(dirs) => dirs.data_dir().join(file),
            None => PathBuf::from(file),
        }
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    pub fn max_frame_len(&self) -> usize {
        self.network.max_frame_len
    }
}

/// Checks `host:port` shape without resolving the host.
fn validate_addr(field: &str, value: &str) -> SyncResult<()> {
    let valid = match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidConfig(format!(
            "{} must be host:port, got '{}'",
            field, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_node_role_parsing() {
        assert_eq!("hub".parse::<NodeRole>().unwrap(), NodeRole::Hub);
        assert_eq!("RELAY".parse::<NodeRole>().unwrap(), NodeRole::Relay);
        assert_eq!("pump".parse::<NodeRole>().unwrap(), NodeRole::Leaf);
        assert!("satellite".parse::<NodeRole>().is_err());
        assert_eq!(NodeRole::Relay.to_string(), "relay");
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(!config.node.id.is_empty());
        assert_eq!(config.hub.bind_addr, "127.0.0.1:65432");
        assert_eq!(config.relay.hub_addr, "127.0.0.1:65432");
        assert_eq!(config.relay.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.leaf.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.leaf.fuel_types.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = NodeConfig::default();

        config.node.id = "  ".to_string();
        assert!(config.validate().unwrap_err().is_config_error());

        config.node.id = "relay-1".to_string();
        config.relay.hub_addr = "no-port".to_string();
        assert!(config.validate().is_err());

        config.relay.hub_addr = "hub.local:65432".to_string();
        assert!(config.validate().is_ok());

        config.leaf.min_loading_secs = 10;
        assert!(config.validate().is_err());

        config.leaf.min_loading_secs = 1;
        config.network.max_frame_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FUELLINE_NODE_ID", "relay-south"),
            ("FUELLINE_HUB_ADDR", "10.0.0.5:7000"),
            ("FUELLINE_DB_PATH", "/tmp/relay.db"),
            ("FUELLINE_MAX_FRAME_LEN", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.node_id(), "relay-south");
        assert_eq!(config.relay.hub_addr, "10.0.0.5:7000");
        assert_eq!(
            config.database_path(NodeRole::Relay),
            PathBuf::from("/tmp/relay.db")
        );
        assert_eq!(config.max_frame_len(), DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [node]
            id = "leaf-7"

            [leaf]
            relay_addr = "127.0.0.1:7100"
            fuel_types = ["95"]
            "#,
        )
        .unwrap();

        assert_eq!(config.node_id(), "leaf-7");
        assert_eq!(config.leaf.fuel_types, vec!["95"]);
        assert_eq!(config.leaf.max_sale_interval_secs, 15);
        assert_eq!(config.relay.bind_addr, DEFAULT_RELAY_ADDR);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            r#"
            [node]
            id = "hub-main"

            [relay]
            outbox_retention_days = 3
            "#,
        )
        .unwrap();

        let loaded = NodeConfig::load(Some(path)).unwrap();
        // FUELLINE_NODE_ID may be set in the test environment
        if std::env::var("FUELLINE_NODE_ID").is_err() {
            assert_eq!(loaded.node_id(), "hub-main");
        }
        assert_eq!(loaded.relay.outbox_retention_days, 3);
        assert_eq!(loaded.relay.cleanup_interval(), Duration::from_secs(3600));
        assert_eq!(loaded.hub.bind_addr, DEFAULT_HUB_ADDR);
    }

    #[test]
    fn test_unreadable_toml_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "[node\nid = ").unwrap();

        assert!(NodeConfig::load(Some(path)).unwrap_err().is_config_error());
    }
}
