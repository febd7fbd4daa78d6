//! Shared CLI helpers: message printing, banner, input checks.

use std::sync::OnceLock;

use chrono::Local;
use colored::Colorize;
use regex::Regex;

use chatwire_core::{ChatMessage, ConnectionState, SenderType};

/// Vietnamese mobile numbers: 10 or 11 digits, nothing else.
pub fn is_valid_phone(phone: &str) -> bool {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE
        .get_or_init(|| Regex::new(r"^[0-9]{10,11}$").expect("valid phone regex"))
        .is_match(phone)
}

/// One log line: `[HH:MM] Name: text`, agents in cyan, the customer in green.
pub fn format_message(msg: &ChatMessage, own_name: &str) -> String {
    let time = msg.created_at.with_timezone(&Local).format("%H:%M");
    let who = match msg.sender_type {
        SenderType::Customer => {
            let name = if own_name.is_empty() { "You" } else { own_name };
            name.green().bold()
        }
        SenderType::Agent => msg.sender_name.as_deref().unwrap_or("Support").cyan().bold(),
    };
    format!("{} {}: {}", format!("[{time}]").dimmed(), who, msg.text)
}

pub fn print_message(msg: &ChatMessage, own_name: &str) {
    println!("{}", format_message(msg, own_name));
}

/// Short status line for a connection state change.
pub fn describe_state(state: ConnectionState) -> Option<String> {
    match state {
        ConnectionState::Connecting => Some("connecting...".dimmed().to_string()),
        ConnectionState::Connected => Some("connected".green().to_string()),
        ConnectionState::Resuming => Some("resuming conversation...".dimmed().to_string()),
        ConnectionState::Disconnected => Some("disconnected".yellow().to_string()),
        // Errors are reported with their reason.
        ConnectionState::Errored => None,
    }
}

/// Print the banner shown at chat start.
pub fn print_banner(server_url: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "💬 Chatwire".cyan().bold(), version.dimmed());
    println!("{}", format!("Support chat at {server_url}").dimmed());
    println!(
        "{}",
        "Type a message, /reconnect, /status, or \"exit\" to quit.".dimmed()
    );
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn phone_validation() {
        assert!(is_valid_phone("0901234567"));
        assert!(is_valid_phone("01234567890"));
        assert!(!is_valid_phone("090123456"));
        assert!(!is_valid_phone("090123456789"));
        assert!(!is_valid_phone("09012345ab"));
        assert!(!is_valid_phone("+84901234567"));
        assert!(!is_valid_phone(""));
    }

    #[test]
    fn format_uses_names() {
        colored::control::set_override(false);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let mine = ChatMessage::customer("hi", at);
        assert!(format_message(&mine, "Ana").ends_with("Ana: hi"));
        assert!(format_message(&mine, "").ends_with("You: hi"));

        let agent = ChatMessage::agent("Chào chị", at).with_sender_name("Minh");
        assert!(format_message(&agent, "Ana").ends_with("Minh: Chào chị"));

        let anonymous = ChatMessage::agent("ok", at);
        assert!(format_message(&anonymous, "Ana").ends_with("Support: ok"));
    }
}
