//! Configuration structures
//!
//! Every section falls back to its defaults, so a partial file (or none at
//! all) still produces a usable [`Config`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CACHE_SCHEMA_VERSION, DEFAULT_API_BASE_URL, DEFAULT_BASE_DELAY_MS, DEFAULT_EXPONENTIAL_BASE,
    DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES, DEFAULT_REFRESH_PATH,
    DEFAULT_REQUEST_TIMEOUT_SECS, MAX_ACTION_RETRIES, MIN_AUTO_SYNC_INTERVAL_SECS,
    PROBE_TIMEOUT_MS, QUEUE_CONCURRENCY, QUEUE_DRAIN_INTERVAL_MS, RECONNECT_DEBOUNCE_MS,
    REPROBE_INTERVAL_SECS,
};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetrySettings,
    pub connectivity: ConnectivityConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Backend endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub refresh_path: String,
    pub user_agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            user_agent: None,
        }
    }
}

impl ApiConfig {
    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Numeric retry defaults; the executor turns these into a `RetryConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
    /// Queued requests processed simultaneously per drain batch.
    pub concurrency: usize,
    /// Pause between drain batches while the queue is non-empty.
    pub drain_interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            jitter: true,
            concurrency: QUEUE_CONCURRENCY,
            drain_interval_ms: QUEUE_DRAIN_INTERVAL_MS,
        }
    }
}

/// Connectivity monitoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub reprobe_interval_secs: u64,
    /// Target of the manual connection test; defaults to the API base URL.
    pub probe_url: Option<String>,
    pub probe_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            reprobe_interval_secs: REPROBE_INTERVAL_SECS,
            probe_url: None,
            probe_timeout_ms: PROBE_TIMEOUT_MS,
        }
    }
}

impl ConnectivityConfig {
    /// Interval between connectivity re-probes while online.
    pub fn reprobe_interval(&self) -> Duration {
        Duration::from_secs(self.reprobe_interval_secs)
    }

    /// Deadline for a single reachability probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Offline cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub schema_version: String,
    /// File used by the durable store. `None` keeps everything in memory.
    pub storage_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { schema_version: CACHE_SCHEMA_VERSION.to_string(), storage_path: None }
    }
}

/// Reconnect synchronisation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub min_auto_sync_interval_secs: u64,
    pub reconnect_debounce_ms: u64,
    pub max_action_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_auto_sync_interval_secs: MIN_AUTO_SYNC_INTERVAL_SECS,
            reconnect_debounce_ms: RECONNECT_DEBOUNCE_MS,
            max_action_retries: MAX_ACTION_RETRIES,
        }
    }
}

impl SyncConfig {
    /// Minimum gap between automatic syncs.
    pub fn min_auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.min_auto_sync_interval_secs)
    }

    /// Quiet period after a reconnect before auto-sync starts.
    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
