//! Utility helpers: path resolution and string shortening for logs.

use std::path::PathBuf;

/// Get the Chatwire data directory (e.g. `~/.chatwire/`).
pub fn get_data_path() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".chatwire")
}

/// Get the default persisted-session file (e.g. `~/.chatwire/session.json`).
pub fn get_session_path() -> PathBuf {
    get_data_path().join("session.json")
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Session file for an optional configured path, `~` expanded.
///
/// Every front end resolves `session.storePath` through here so they all
/// read the same file.
pub fn resolve_session_path(store_path: Option<&str>) -> PathBuf {
    store_path.map(expand_home).unwrap_or_else(get_session_path)
}

fn home_dir() -> Option<PathBuf> {
    dirs_next::home_dir()
}
