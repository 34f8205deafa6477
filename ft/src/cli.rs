//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::SessionKind;

/// Focustimer - crash-safe Pomodoro timer
#[derive(Parser)]
#[command(
    name = "ft",
    about = "Crash-safe Pomodoro focus timer",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override the data directory (state and logs)
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a session and count it down in the foreground
    Run {
        /// Session kind (work, short-break, long-break)
        #[arg(short, long, default_value = "work")]
        kind: SessionKind,

        /// Planned length in minutes (defaults to the configured length)
        #[arg(short, long)]
        minutes: Option<u64>,
    },

    /// Resume a paused session and count it down in the foreground
    Resume,

    /// Pause the active session
    Pause,

    /// Cancel the active session
    Cancel,

    /// Count an interruption against the active session
    Interrupt,

    /// Show the active session
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show archived sessions, newest first
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for status and history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text, json", s)),
        }
    }
}

/// `mm:ss` rendering of a millisecond count, rounded up to the second
pub fn format_clock(ms: u64) -> String {
    let secs = ms.div_ceil(1000);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(1), "00:01");
        assert_eq!(format_clock(1_500_000), "25:00");
        assert_eq!(format_clock(61_999), "01:02");
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["ft", "run"]).unwrap();
        match cli.command {
            Command::Run { kind, minutes } => {
                assert_eq!(kind, SessionKind::Work);
                assert_eq!(minutes, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ft", "status", "--format", "json", "--data-dir", "/tmp/ft"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/ft")));
        assert!(matches!(
            cli.command,
            Command::Status {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_parse_break_kind() {
        let cli = Cli::try_parse_from(["ft", "run", "--kind", "short-break", "--minutes", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Run {
                kind: SessionKind::ShortBreak,
                minutes: Some(5)
            }
        ));
    }
}
