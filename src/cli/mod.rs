//! CLI definitions for hookrelay.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::store::SessionEvent;
use crate::types::{HttpMethod, LogEntry};

/// hookrelay CLI
#[derive(Parser, Debug)]
#[command(name = "hookrelay", version, about = "Trigger remote workflows and follow their event streams")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trigger a webhook once and follow its run until it ends
    Fire(FireArgs),
    /// Load an agent book, arm its schedules, and print every session event
    Watch(WatchArgs),
}

/// Arguments for `hookrelay fire`.
#[derive(Parser, Debug)]
pub struct FireArgs {
    /// Webhook URL to call
    pub url: String,

    /// HTTP method (GET or POST)
    #[arg(short, long, default_value = "POST")]
    pub method: HttpMethod,

    /// JSON object merged into the trigger body
    #[arg(short, long)]
    pub payload: Option<String>,

    /// Display name for the run
    #[arg(short, long, default_value = "adhoc")]
    pub name: String,
}

/// Arguments for `hookrelay watch`.
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Path to a TOML agent book
    pub agents: PathBuf,

    /// Trigger these agents immediately after loading
    #[arg(short, long = "trigger")]
    pub trigger: Vec<String>,
}

/// Render a log line for the terminal.
pub fn format_entry(session_name: &str, entry: &LogEntry) -> String {
    format!(
        "{} [{}] {:<7} {}",
        entry.timestamp.format("%H:%M:%S%.3f"),
        session_name,
        entry.level.to_string(),
        entry.message
    )
}

/// Render a session event that is not a log line, if it is worth printing.
pub fn format_event(session_name: &str, event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::LogAppended { entry, .. } => Some(format_entry(session_name, entry)),
        SessionEvent::StatusChanged { status, .. } if status.is_terminal() => {
            Some(format!("[{session_name}] finished: {status}"))
        }
        _ => None,
    }
}
