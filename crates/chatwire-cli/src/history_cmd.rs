//! `chatwire history`: print the saved conversation's backlog and exit.

use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;

use chatwire_client::{HistoryLoader, HttpHistoryLoader};
use chatwire_core::config::load_config;
use chatwire_core::session::{FileSessionStore, SessionStore};
use chatwire_core::ChatMessage;

use crate::helpers;
use crate::status::session_path;

/// Run the history command.
pub async fn run(json: bool) -> Result<()> {
    let config = load_config(None);
    let store = FileSessionStore::new(Some(session_path(&config)));

    let Some(identity) = store.load() else {
        eprintln!(
            "{}",
            "No saved conversation. Run `chatwire chat` to start one.".yellow()
        );
        return Ok(());
    };

    let loader = HttpHistoryLoader::new(
        &config.server,
        Duration::from_secs(config.history.timeout_secs),
    )?;
    let messages = loader
        .fetch_history(&identity.conversation_id, &identity.access_token)
        .await
        .context("failed to load the conversation")?;

    println!("{}", render(&messages, &identity.display_name, json)?);
    Ok(())
}

fn render(messages: &[ChatMessage], own_name: &str, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(messages)?);
    }
    if messages.is_empty() {
        return Ok("(no messages yet)".dimmed().to_string());
    }
    Ok(messages
        .iter()
        .map(|m| helpers::format_message(m, own_name))
        .collect::<Vec<_>>()
        .join("\n"))
}
