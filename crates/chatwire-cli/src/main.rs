//! Chatwire CLI: entry point.
//!
//! # Commands
//!
//! - `chatwire chat [--name N --phone P --message M]`: interactive support chat
//! - `chatwire status`: show configuration and the persisted session
//! - `chatwire history [--json]`: print the current conversation and exit
//! - `chatwire reset`: forget the persisted session

mod helpers;
mod history_cmd;
mod repl;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};

use chatwire_core::config::load_config;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Chatwire: terminal client for live support chat
#[derive(Parser)]
#[command(name = "chatwire", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat (resumes the saved conversation if there is one)
    Chat {
        /// Your name, for a new conversation
        #[arg(short, long)]
        name: Option<String>,

        /// Phone number (10-11 digits), for a new conversation
        #[arg(short, long)]
        phone: Option<String>,

        /// Opening message, for a new conversation
        #[arg(short, long)]
        message: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and session status
    Status,

    /// Print the saved conversation's history and exit
    History {
        /// Print raw JSON instead of formatted lines
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Forget the saved conversation
    Reset,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            name,
            phone,
            message,
            logs,
        } => {
            init_logging(logs);
            let config = load_config(None);
            let prefill = repl::Prefill {
                name,
                phone,
                message,
            };
            repl::run(config, prefill).await
        }
        Commands::Status => status::run(),
        Commands::History { json, logs } => {
            init_logging(logs);
            history_cmd::run(json).await
        }
        Commands::Reset => {
            init_logging(false);
            status::reset()
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("chatwire=debug,chatwire_core=debug,chatwire_client=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
