//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Probe the standard locations for a config file (JSON or TOML)
//! 2. Fall back to defaults when no file exists
//! 3. Apply `CIRCLEPAY_*` environment overrides on top
//!
//! ## Environment Variables
//! - `CIRCLEPAY_API_BASE_URL`: Backend base URL
//! - `CIRCLEPAY_API_TIMEOUT_SECS`: Per-request timeout in seconds
//! - `CIRCLEPAY_RETRY_MAX_RETRIES`: Retries after the first attempt
//! - `CIRCLEPAY_RETRY_JITTER`: Whether backoff delays are jittered (true/false)
//! - `CIRCLEPAY_CACHE_PATH`: File backing the durable store
//! - `CIRCLEPAY_LOG_LEVEL`: Default log level when `RUST_LOG` is unset
//! - `CIRCLEPAY_LOG_JSON`: Emit JSON log lines (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./circlepay.toml` or `./circlepay.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names one and two directories up
//! 4. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use circlepay_domain::{CirclePayError, Config, Result};

use crate::errors::InfraError;

const FILE_NAMES: [&str; 4] = ["circlepay.toml", "circlepay.json", "config.toml", "config.json"];
const SEARCH_DIRS: [&str; 3] = [".", "..", "../.."];

/// Load configuration from the first config file found, then the environment
///
/// A missing file is not an error; defaults are used instead.
///
/// # Errors
/// Returns `CirclePayError::Config` if the file exists but cannot be parsed
/// or an environment override has an invalid value.
pub fn load() -> Result<Config> {
    let mut config = match probe_config_paths() {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::info!("No config file found, using defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Defaults with environment overrides applied
///
/// # Errors
/// Returns `CirclePayError::Config` if a variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Overwrite fields of `config` from `CIRCLEPAY_*` variables that are set
///
/// # Errors
/// Returns `CirclePayError::Config` if a numeric variable does not parse.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(base_url) = env_var("CIRCLEPAY_API_BASE_URL") {
        url::Url::parse(&base_url).map_err(|e| CirclePayError::from(InfraError::from(e)))?;
        config.api.base_url = base_url;
    }
    if let Some(timeout) = env_parse::<u64>("CIRCLEPAY_API_TIMEOUT_SECS")? {
        config.api.timeout_secs = timeout;
    }
    if let Some(retries) = env_parse::<u32>("CIRCLEPAY_RETRY_MAX_RETRIES")? {
        config.retry.max_retries = retries;
    }
    config.retry.jitter = env_bool("CIRCLEPAY_RETRY_JITTER", config.retry.jitter);
    if let Some(path) = env_var("CIRCLEPAY_CACHE_PATH") {
        config.cache.storage_path = Some(path);
    }
    if let Some(level) = env_var("CIRCLEPAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("CIRCLEPAY_LOG_JSON", config.logging.json);
    Ok(())
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `CirclePayError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CirclePayError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CirclePayError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CirclePayError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| InfraError::from(e).into()),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CirclePayError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(CirclePayError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| {
            SEARCH_DIRS
                .iter()
                .flat_map(move |dir| FILE_NAMES.iter().map(move |name| root.join(dir).join(name)))
        })
        .find(|path| path.exists())
}

/// Non-empty environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse an optional environment variable
///
/// # Errors
/// Returns `CirclePayError::Config` if the variable is set but invalid.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| CirclePayError::Config(format!("Invalid value for {}: {}", key, e)))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    env_var(key)
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
