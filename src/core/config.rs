//! Configuration parsing and validation.
//!
//! Configuration is loaded from a TOML file with CLI overrides. Every
//! section is optional; an empty file describes a file-backed index with
//! default paths.

use crate::index::cache::DEFAULT_LOOKUP_CACHE_CAPACITY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/msgindex.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Index identity and lookup behavior.
    #[serde(default)]
    pub index: IndexConfig,

    /// Durable snapshot storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rebuild lock.
    #[serde(default)]
    pub lock: LockConfig,

    /// Message group definitions.
    #[serde(default)]
    pub groups: GroupsConfig,

    /// Long-running maintenance process.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Index identity and lookup behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index name; the invalidation token key derives from it.
    #[serde(default = "default_index_name")]
    pub name: String,

    /// Keys held by the process-local lookup cache.
    #[serde(default = "default_lookup_cache_capacity")]
    pub lookup_cache_capacity: usize,

    /// Lifetime of the interim overlay in seconds.
    #[serde(default = "default_interim_ttl_seconds")]
    pub interim_ttl_seconds: u64,

    /// Namespaces holding translatable messages. Empty accepts all.
    #[serde(default)]
    pub message_namespaces: Vec<i32>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            lookup_cache_capacity: default_lookup_cache_capacity(),
            interim_ttl_seconds: default_interim_ttl_seconds(),
            message_namespaces: Vec::new(),
        }
    }
}

impl IndexConfig {
    /// Overlay lifetime.
    pub fn interim_ttl(&self) -> Duration {
        Duration::from_secs(self.interim_ttl_seconds)
    }
}

/// Durable snapshot storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend: "memory" or "file".
    #[serde(default = "default_file_backend")]
    pub backend: String,

    /// Snapshot file for the file backend.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_file_backend(),
            path: default_storage_path(),
        }
    }
}

/// Rebuild lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Backend: "memory" or "file".
    #[serde(default = "default_file_backend")]
    pub backend: String,

    /// Lock file for the file backend.
    #[serde(default = "default_lock_path")]
    pub path: PathBuf,

    /// Maximum wait for a held lock in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// Age in milliseconds after which a lock file is considered abandoned.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: default_file_backend(),
            path: default_lock_path(),
            timeout_ms: default_lock_timeout_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl LockConfig {
    /// Maximum wait for a held lock.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Age after which a lock file is broken.
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Message group definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsConfig {
    /// TOML file with `[[group]]` and `[[aggregate]]` tables.
    #[serde(default = "default_group_definitions")]
    pub definitions: PathBuf,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            definitions: default_group_definitions(),
        }
    }
}

/// Long-running maintenance process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Rebuild once when the process starts.
    #[serde(default = "default_rebuild_on_start")]
    pub rebuild_on_start: bool,

    /// Seconds between periodic rebuilds; 0 disables them.
    #[serde(default)]
    pub rebuild_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            rebuild_on_start: default_rebuild_on_start(),
            rebuild_interval_seconds: 0,
        }
    }
}

impl MaintenanceConfig {
    /// Periodic rebuild interval, if enabled.
    pub fn rebuild_interval(&self) -> Option<Duration> {
        (self.rebuild_interval_seconds > 0)
            .then(|| Duration::from_secs(self.rebuild_interval_seconds))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_index_name() -> String {
    "message-index".to_string()
}

fn default_lookup_cache_capacity() -> usize {
    DEFAULT_LOOKUP_CACHE_CAPACITY
}

fn default_interim_ttl_seconds() -> u64 {
    86_400
}

fn default_file_backend() -> String {
    "file".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/message-index.bin")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("data/message-index.lock")
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_stale_after_ms() -> u64 {
    300_000
}

fn default_group_definitions() -> PathBuf {
    PathBuf::from("config/groups.toml")
}

fn default_rebuild_on_start() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

const BACKENDS: [&str; 2] = ["memory", "file"];
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref storage_path) = overrides.storage_path {
            self.storage.path = storage_path.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_index()?;
        self.validate_backends()?;
        self.validate_lock()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_index(&self) -> Result<()> {
        if self.index.name.trim().is_empty() {
            anyhow::bail!("index.name must not be empty");
        }
        if self.index.lookup_cache_capacity == 0 {
            anyhow::bail!("index.lookup_cache_capacity must be > 0");
        }
        if self.index.interim_ttl_seconds == 0 {
            anyhow::bail!("index.interim_ttl_seconds must be > 0");
        }
        Ok(())
    }

    fn validate_backends(&self) -> Result<()> {
        if !BACKENDS.contains(&self.storage.backend.as_str()) {
            anyhow::bail!(
                "storage.backend must be one of {:?}, got: {}",
                BACKENDS,
                self.storage.backend
            );
        }
        if !BACKENDS.contains(&self.lock.backend.as_str()) {
            anyhow::bail!(
                "lock.backend must be one of {:?}, got: {}",
                BACKENDS,
                self.lock.backend
            );
        }
        Ok(())
    }

    fn validate_lock(&self) -> Result<()> {
        if self.lock.backend == "file" && self.lock.stale_after_ms <= self.lock.timeout_ms {
            anyhow::bail!(
                "lock.stale_after_ms ({}) must exceed lock.timeout_ms ({})",
                self.lock.stale_after_ms,
                self.lock.timeout_ms
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                LOG_LEVELS,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override snapshot file path.
    pub storage_path: Option<PathBuf>,
}
