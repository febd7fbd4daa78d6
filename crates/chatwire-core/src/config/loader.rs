//! Config loader: reads `~/.chatwire/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.chatwire/config.json`
//! 3. Environment variables `CHATWIRE_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `CHATWIRE_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `CHATWIRE_SERVER__URL` → `server.url`
/// - `CHATWIRE_SERVER__API_PREFIX` → `server.api_prefix`
/// - `CHATWIRE_CONNECTION__CONNECT_TIMEOUT_SECS` → `connection.connect_timeout_secs`
/// - `CHATWIRE_CONNECTION__ACK_TIMEOUT_SECS` → `connection.ack_timeout_secs`
/// - `CHATWIRE_CONNECTION__RECONNECT__ENABLED` → `connection.reconnect.enabled`
/// - `CHATWIRE_HISTORY__TIMEOUT_SECS` → `history.timeout_secs`
/// - `CHATWIRE_SESSION__STORE_PATH` → `session.store_path`
fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides read through `var`, keyed by env var name.
fn apply_overrides(mut config: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    // Server
    if let Some(val) = var("CHATWIRE_SERVER__URL") {
        config.server.url = val;
    }
    if let Some(val) = var("CHATWIRE_SERVER__API_PREFIX") {
        config.server.api_prefix = val;
    }

    // Connection
    if let Some(n) = var("CHATWIRE_CONNECTION__CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.connection.connect_timeout_secs = n;
    }
    if let Some(n) = var("CHATWIRE_CONNECTION__ACK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.connection.ack_timeout_secs = n;
    }
    if let Some(val) = var("CHATWIRE_CONNECTION__RECONNECT__ENABLED") {
        config.connection.reconnect.enabled = val == "true" || val == "1";
    }

    // History
    if let Some(n) = var("CHATWIRE_HISTORY__TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.history.timeout_secs = n;
    }

    // Session
    if let Some(val) = var("CHATWIRE_SESSION__STORE_PATH") {
        if !val.is_empty() {
            config.session.store_path = Some(val);
        }
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
