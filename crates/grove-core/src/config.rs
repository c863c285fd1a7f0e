//! Replica configuration
//!
//! Loaded from TOML, then overridden by `GROVE_`-prefixed environment
//! variables, then validated. Every field has a default, so an empty file is
//! a valid configuration.
//!
//! ```toml
//! data_dir = "/var/lib/grove"
//!
//! [sync]
//! reconcile_interval_ms = 5000
//! missing_tree_workers = 10
//! existing_tree_workers = 4
//!
//! [objects]
//! snapshot_interval = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::GroveError;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "GROVE_";

/// Synchronizer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the ledger-then-content reconciliation loop
    pub reconcile_interval_ms: u64,
    /// Workers fetching trees the replica has never seen
    pub missing_tree_workers: usize,
    /// Workers applying head updates to known trees
    pub existing_tree_workers: usize,
    /// Bounded queue length per pool; submission blocks when full
    pub queue_capacity: usize,
    /// Deadline for a single peer request
    pub peer_request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 5_000,
            missing_tree_workers: 10,
            existing_tree_workers: 4,
            queue_capacity: 64,
            peer_request_timeout_ms: 10_000,
        }
    }
}

impl SyncConfig {
    /// Reconciliation period as a `Duration`
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Peer request deadline as a `Duration`
    pub fn peer_request_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_request_timeout_ms)
    }
}

/// Object tree settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// A full snapshot replaces every Nth change since the last snapshot
    pub snapshot_interval: u32,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 10,
        }
    }
}

/// Backoff settings for `wait_for_sync`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// First poll interval
    pub initial_backoff_ms: u64,
    /// Upper bound on the poll interval
    pub max_backoff_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

/// Top-level replica configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroveConfig {
    /// Root of durable storage
    pub data_dir: PathBuf,
    /// Directory holding read keys; defaults to `<data_dir>/keys`
    pub key_dir: Option<PathBuf>,
    /// Synchronizer settings
    pub sync: SyncConfig,
    /// Object tree settings
    pub objects: ObjectConfig,
    /// `wait_for_sync` settings
    pub wait: WaitConfig,
}

impl Default for GroveConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grove");
        Self {
            data_dir,
            key_dir: None,
            sync: SyncConfig::default(),
            objects: ObjectConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl GroveConfig {
    /// Load from a TOML file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, GroveError> {
        let mut config = Self::load_from_file(path)?;
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, GroveError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GroveError::invalid(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self, GroveError> {
        toml::from_str(content).map_err(|e| GroveError::invalid(format!("invalid config: {e}")))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, GroveError> {
        toml::to_string_pretty(self).map_err(|e| GroveError::serialization(e.to_string()))
    }

    /// Apply `GROVE_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<(), GroveError> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from an explicit variable list
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<(), GroveError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.set_from_string(&name.to_lowercase(), &value)?;
        }
        Ok(())
    }

    /// Set one field by its flattened name (`sync_reconcile_interval_ms`)
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), GroveError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, GroveError> {
            value
                .parse()
                .map_err(|_| GroveError::invalid(format!("bad value '{value}' for {key}")))
        }

        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "key_dir" => self.key_dir = Some(PathBuf::from(value)),
            "sync_reconcile_interval_ms" => self.sync.reconcile_interval_ms = parse(key, value)?,
            "sync_missing_tree_workers" => self.sync.missing_tree_workers = parse(key, value)?,
            "sync_existing_tree_workers" => self.sync.existing_tree_workers = parse(key, value)?,
            "sync_queue_capacity" => self.sync.queue_capacity = parse(key, value)?,
            "sync_peer_request_timeout_ms" => {
                self.sync.peer_request_timeout_ms = parse(key, value)?;
            }
            "objects_snapshot_interval" => self.objects.snapshot_interval = parse(key, value)?,
            "wait_initial_backoff_ms" => self.wait.initial_backoff_ms = parse(key, value)?,
            "wait_max_backoff_ms" => self.wait.max_backoff_ms = parse(key, value)?,
            // Unrelated GROVE_* variables (e.g. GROVE_LOG) are not config.
            other => tracing::trace!(key = other, "ignoring unknown config override"),
        }
        Ok(())
    }

    /// Reject configurations the runtime cannot honour
    pub fn validate(&self) -> Result<(), GroveError> {
        if self.sync.reconcile_interval_ms == 0 {
            return Err(GroveError::invalid("sync.reconcile_interval_ms must be > 0"));
        }
        if self.sync.missing_tree_workers == 0 || self.sync.existing_tree_workers == 0 {
            return Err(GroveError::invalid("sync worker pools need at least one worker"));
        }
        if self.sync.queue_capacity == 0 {
            return Err(GroveError::invalid("sync.queue_capacity must be > 0"));
        }
        if self.objects.snapshot_interval < 2 {
            return Err(GroveError::invalid("objects.snapshot_interval must be >= 2"));
        }
        if self.wait.initial_backoff_ms == 0 || self.wait.initial_backoff_ms > self.wait.max_backoff_ms {
            return Err(GroveError::invalid(
                "wait backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Directory holding persisted read keys
    pub fn key_dir(&self) -> PathBuf {
        self.key_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }

    /// Directory holding trees, ledgers and headers
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = GroveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.missing_tree_workers, 10);
        assert_eq!(config.sync.existing_tree_workers, 4);
        assert_eq!(config.objects.snapshot_interval, 10);
        assert_eq!(config.sync.reconcile_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GroveConfig::from_toml("[sync]\nexisting_tree_workers = 2\n").unwrap();
        assert_eq!(config.sync.existing_tree_workers, 2);
        assert_eq!(config.sync.missing_tree_workers, 10);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GroveConfig::default();
        config
            .merge_with_vars(vec![
                ("GROVE_SYNC_RECONCILE_INTERVAL_MS".to_string(), "250".to_string()),
                ("GROVE_DATA_DIR".to_string(), "/tmp/grove".to_string()),
                ("GROVE_LOG".to_string(), "debug".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();
        assert_eq!(config.sync.reconcile_interval_ms, 250);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/grove"));
        assert_eq!(config.key_dir(), PathBuf::from("/tmp/grove/keys"));
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = GroveConfig::default();
        let result = config.merge_with_vars(vec![(
            "GROVE_SYNC_QUEUE_CAPACITY".to_string(),
            "lots".to_string(),
        )]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = GroveConfig::default();
        config.objects.snapshot_interval = 1;
        assert!(config.validate().is_err());

        let mut config = GroveConfig::default();
        config.wait.initial_backoff_ms = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GroveConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(GroveConfig::from_toml(&text).unwrap(), config);
    }
}
