//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use chatwire_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Server: {}", cfg.server.url);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config, save_config};
pub use schema::{Config, ConnectionConfig, HistoryConfig, ReconnectConfig, ServerConfig, SessionConfig};
