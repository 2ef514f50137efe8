//! Application constants
//!
//! Centralized location for domain-level constants used throughout the
//! resilience core.

// Cache layout
pub const CACHE_SCHEMA_VERSION: &str = "1.0.0";
pub const CACHE_KEY_PREFIX: &str = "cache_";
pub const PENDING_ACTIONS_KEY: &str = "pending_actions";
pub const ESCALATED_ACTIONS_KEY: &str = "escalated_actions";
pub const SYNC_STATUS_KEY: &str = "sync_status";

// Default TTLs by cache namespace (seconds)
pub const USER_TTL_SECS: u64 = 24 * 60 * 60;
pub const WALLETS_TTL_SECS: u64 = 12 * 60 * 60;
pub const TRANSACTIONS_TTL_SECS: u64 = 6 * 60 * 60;
pub const CHAINS_TTL_SECS: u64 = 7 * 24 * 60 * 60;

// Credential keys in the key/value store
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

// Retry defaults
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;
pub const QUEUE_CONCURRENCY: usize = 3;
pub const QUEUE_DRAIN_INTERVAL_MS: u64 = 1_000;

// Connectivity
pub const REPROBE_INTERVAL_SECS: u64 = 30;
pub const PROBE_TIMEOUT_MS: u64 = 5_000;
pub const WIFI_EXCELLENT_DBM: i32 = -50;
pub const WIFI_GOOD_DBM: i32 = -70;

// Sync
pub const MIN_AUTO_SYNC_INTERVAL_SECS: u64 = 5 * 60;
pub const RECONNECT_DEBOUNCE_MS: u64 = 2_000;
pub const MAX_ACTION_RETRIES: u32 = 5;

// HTTP
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
