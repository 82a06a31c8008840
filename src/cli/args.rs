//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Poll Glooko for CGM and pump data and emit Nightscout-shaped records.
#[derive(Parser, Debug, Default)]
#[command(name = "cgm-bridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    // === Global flags ===
    /// Config file path (default: platform config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Glooko server host or URL
    #[arg(long, value_name = "HOST", global = true)]
    pub server: Option<String>,

    /// Expected data interval in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    pub interval_ms: Option<u64>,

    /// Append results to this file instead of stdout
    #[arg(long, value_name = "PATH", global = true)]
    pub output: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Poll until interrupted (default command)
    Run,

    /// Run a single cycle and print its result
    Once,

    /// Validate configuration and try to sign in
    Check,
}

impl Cli {
    /// The command to run, defaulting to `run`.
    #[must_use]
    pub fn selected_command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
