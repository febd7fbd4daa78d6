//! `chatwire status` and `chatwire reset`: configuration and persisted session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;

use chatwire_core::config::{get_config_path, load_config, Config};
use chatwire_core::session::{FileSessionStore, SessionStore};
use chatwire_core::utils::{resolve_session_path, truncate_string};

/// Run the status command.
pub fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "💬 Chatwire Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found, using defaults)".dimmed().to_string()
        }
    );
    println!("  {:<18} {}", "Server:".bold(), config.server.url);
    println!("  {:<18} {}", "API base:".bold(), config.server.api_base());
    println!(
        "  {:<18} {}",
        "Auto-reconnect:".bold(),
        if config.connection.reconnect.enabled {
            format!(
                "{} (max {} attempts)",
                "on".green(),
                config.connection.reconnect.max_attempts
            )
        } else {
            "off".dimmed().to_string()
        }
    );

    let store = FileSessionStore::new(Some(session_path(&config)));
    println!();
    println!(
        "  {:<18} {} {}",
        "Session file:".bold(),
        store.path().display(),
        if store.path().exists() {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    match store.load() {
        Some(identity) => {
            let name = if identity.display_name.is_empty() {
                "(unnamed)".dimmed().to_string()
            } else {
                identity.display_name
            };
            println!(
                "  {:<18} {}",
                "Conversation:".bold(),
                truncate_string(&identity.conversation_id, 40)
            );
            println!("  {:<18} {}", "Name:".bold(), name);
        }
        None => {
            println!(
                "  {:<18} {}",
                "Conversation:".bold(),
                "none (run `chatwire chat` to start one)".dimmed()
            );
        }
    }

    println!();
    Ok(())
}

/// Forget the persisted session.
pub fn reset() -> Result<()> {
    let config = load_config(None);
    let store = FileSessionStore::new(Some(session_path(&config)));
    let existed = store.load().is_some();

    store
        .clear()
        .with_context(|| format!("failed to clear {}", store.path().display()))?;

    if existed {
        println!("{} Saved conversation forgotten", "✓".green());
    } else {
        println!("{}", "No saved conversation.".dimmed());
    }
    Ok(())
}

/// Session file the chat command would use.
pub fn session_path(config: &Config) -> PathBuf {
    resolve_session_path(config.session.store_path.as_deref())
}
