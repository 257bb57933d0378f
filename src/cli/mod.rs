//! CLI entry point for rtloop.

pub mod chat;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Interactive agent over a realtime model connection.
#[derive(Parser, Debug)]
#[command(name = "rtloop", version, about = "Interactive realtime agent with local tools")]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. warn, info, rtloop=debug)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session
    Chat(ChatArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Session name; the log is kept as <session_dir>/<name>.jsonl
    #[arg(short, long, default_value = "default")]
    pub session: String,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Realtime model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// System instructions override
    #[arg(long)]
    pub instructions: Option<String>,

    /// Start fresh instead of resuming the saved session
    #[arg(long)]
    pub new: bool,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Install the fmt subscriber on stderr, honoring `RUST_LOG` when set.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
