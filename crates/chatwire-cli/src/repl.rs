//! Interactive chat: onboarding prompts, the event printer, and the input loop.
//!
//! Uses `rustyline` for readline-style editing with persistent history.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use chatwire_client::SessionCoordinator;
use chatwire_core::bus::{EventBus, SessionEvent};
use chatwire_core::config::Config;
use chatwire_core::{ChatError, CustomerInfo};

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Room for a full history seed plus live traffic.
const EVENT_BUFFER: usize = 1024;

/// New-conversation details given on the command line.
#[derive(Debug, Default)]
pub struct Prefill {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
}

/// Run the interactive chat.
pub async fn run(config: Config, prefill: Prefill) -> Result<()> {
    let bus = Arc::new(EventBus::new(EVENT_BUFFER));
    let coordinator = Arc::new(
        SessionCoordinator::from_config(&config, bus.clone())
            .context("failed to set up the chat session")?,
    );

    helpers::print_banner(&config.server.url);
    let mut editor = create_editor()?;

    // Handshake progress prints as it happens.
    let printer = Printer::spawn(bus);

    let restored = coordinator
        .restore()
        .await
        .context("failed to restore the saved session")?;
    if restored.is_none() && !onboard(&mut editor, &coordinator, prefill).await? {
        coordinator.shutdown().await;
        printer.finish().await;
        save_history(&mut editor);
        return Ok(());
    }

    loop {
        let input = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_command(trimmed) {
            println!("\nGoodbye! 👋");
            break;
        }
        let _ = editor.add_history_entry(&input);

        match trimmed {
            "/reconnect" => {
                if let Err(e) = coordinator.reconnect().await {
                    eprintln!("{} {e}", "reconnect failed:".red());
                }
            }
            "/status" => {
                println!(
                    "{} {}",
                    "connection:".dimmed(),
                    coordinator.connection_state()
                );
            }
            text => match coordinator.send_message(text).await {
                Ok(()) => debug!("message sent"),
                Err(ChatError::NotConnected) => eprintln!(
                    "{}",
                    "Not connected. Type /reconnect and try again.".yellow()
                ),
                Err(e) => eprintln!("{} {e}", "✗".red()),
            },
        }
    }

    coordinator.shutdown().await;
    printer.finish().await;
    save_history(&mut editor);

    Ok(())
}

// ─────────────────────────────────────────────
// Onboarding
// ─────────────────────────────────────────────

/// Ask for the new-conversation details and start it.
///
/// Returns `false` if the user quit before a conversation started.
async fn onboard(
    editor: &mut Editor<(), DefaultHistory>,
    coordinator: &SessionCoordinator,
    prefill: Prefill,
) -> Result<bool> {
    println!(
        "{}",
        "Leave your details and an agent will be with you shortly.".bold()
    );

    let Some(name) = prompt_field(editor, "Name", prefill.name, |v| {
        (!v.is_empty()).then_some(()).ok_or("Please enter your name")
    })?
    else {
        return Ok(false);
    };
    let Some(phone) = prompt_field(editor, "Phone", prefill.phone, |v| {
        if v.is_empty() {
            Err("Please enter your phone number")
        } else if !helpers::is_valid_phone(v) {
            Err("Phone number must be 10-11 digits")
        } else {
            Ok(())
        }
    })?
    else {
        return Ok(false);
    };
    let Some(message) = prompt_field(editor, "Message", prefill.message, |v| {
        (!v.is_empty()).then_some(()).ok_or("Please enter a message")
    })?
    else {
        return Ok(false);
    };

    let info = CustomerInfo::new(name, phone, message);
    loop {
        println!("{}", "Starting conversation...".dimmed());
        match coordinator.start_new(&info).await {
            Ok(identity) => {
                debug!(conversation = %identity.conversation_id, "conversation started");
                return Ok(true);
            }
            Err(e) if e.is_retryable() => {
                eprintln!("{} {e}", "Could not start the chat:".red());
                match editor.readline("Retry? [Y/n] ") {
                    Ok(answer) if !answer.trim().eq_ignore_ascii_case("n") => continue,
                    _ => return Ok(false),
                }
            }
            Err(e) => return Err(e).context("failed to start the conversation"),
        }
    }
}

/// Read one trimmed field, re-asking until `check` passes. A valid prefilled
/// value is used without prompting. `None` means the user quit.
fn prompt_field(
    editor: &mut Editor<(), DefaultHistory>,
    label: &str,
    prefill: Option<String>,
    check: impl Fn(&str) -> std::result::Result<(), &'static str>,
) -> Result<Option<String>> {
    if let Some(value) = prefill.map(|v| v.trim().to_string()) {
        match check(&value) {
            Ok(()) => return Ok(Some(value)),
            Err(reason) => eprintln!("{} {reason}", "✗".red()),
        }
    }

    loop {
        let line = match editor.readline(&format!("{label}: ")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(None),
            Err(e) => return Err(e).context("failed to read input"),
        };
        let value = line.trim().to_string();
        match check(&value) {
            Ok(()) => return Ok(Some(value)),
            Err(reason) => eprintln!("{} {reason}", "✗".red()),
        }
    }
}

// ─────────────────────────────────────────────
// Event printer
// ─────────────────────────────────────────────

/// Background task printing session events as they arrive.
struct Printer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Printer {
    fn spawn(bus: Arc<EventBus>) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut view = EventView::default();
            loop {
                tokio::select! {
                    event = bus.consume() => match event {
                        Some(event) => view.show(event),
                        None => return,
                    },
                    _ = &mut stopped => break,
                }
            }
            // Flush whatever shutdown queued.
            for event in bus.drain().await {
                view.show(event);
            }
        });
        Printer { stop, task }
    }

    /// Stop after printing everything already queued.
    async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

/// Turns bus events into terminal lines.
#[derive(Default)]
struct EventView {
    /// Customer name, learned from the session start.
    own_name: String,
}

impl EventView {
    fn show(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started(identity) => {
                debug!(conversation = %identity.conversation_id, "session started");
                self.own_name = identity.display_name;
            }
            SessionEvent::StateChanged(state) => {
                if let Some(line) = helpers::describe_state(state) {
                    println!("{} {line}", "·".dimmed());
                }
            }
            SessionEvent::MessageAppended(msg) => helpers::print_message(&msg, &self.own_name),
            SessionEvent::HistorySeeded(messages) => {
                for msg in &messages {
                    helpers::print_message(msg, &self.own_name);
                }
            }
            SessionEvent::HistoryFailed(reason) => {
                eprintln!(
                    "{} {reason}",
                    "Earlier messages could not be loaded:".yellow()
                );
            }
            SessionEvent::ConnectionError(reason) => {
                eprintln!(
                    "{} {reason} {}",
                    "Connection error:".red(),
                    "(type /reconnect to retry)".dimmed()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────
// Editor
// ─────────────────────────────────────────────

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded input history from {}", history_path.display());
    }

    Ok(editor)
}

/// Save history to disk.
fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

/// Path to the input history file.
fn history_path() -> std::path::PathBuf {
    chatwire_core::utils::get_data_path()
        .join("history")
        .join("input_history")
}

/// Check if input is an exit command.
fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
