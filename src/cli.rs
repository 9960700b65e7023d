//! Command-line interface for voxline
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Voice assistant for telephony media streams
#[derive(Parser, Debug)]
#[command(
    name = "voxline",
    version,
    about = "Voice assistant for telephony media streams"
)]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a stall timeout.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`2s`, `1500ms`, `1s500ms`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let timeout = match s.parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if timeout.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(timeout)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer calls: serve the webhook and media-stream endpoints
    Serve {
        /// Listen address (e.g., 0.0.0.0:3000)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Public hostname the telephony provider reaches us on (e.g., abc.ngrok.app)
        #[arg(long, value_name = "HOST")]
        public_host: Option<String>,

        /// How long to wait for a missing fragment before skipping it. Examples: 4s, 1500ms
        #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
        stall_timeout: Option<Duration>,
    },

    /// Check credentials and configuration
    Check,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Synthesize one piece of text to a raw mu-law file
    Speak {
        /// Text to speak
        text: String,

        /// Output file (8kHz mu-law, no container)
        #[arg(long, short = 'o', value_name = "FILE")]
        output: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Show the effective configuration (file + environment)
    Show,
    /// Dump a fully-defaulted configuration template
    Dump,
}
