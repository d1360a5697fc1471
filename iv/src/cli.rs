//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::runtime::check_runtimes;

/// Interactview - live viewer for interactsh interaction logs
#[derive(Parser)]
#[command(
    name = "iv",
    about = "Live viewer and supervisor for interactsh interaction logs",
    version
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

    /// Write `serve` logs to the log file instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Server URL for client commands (default: derived from server.bind)
    #[arg(short, long, global = true)]
    pub url: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the viewer: ingestion, live stream and control API (default)
    Serve,

    /// Start the producer
    Start {
        /// Relaunch even if a producer is already running
        #[arg(short, long)]
        force: bool,

        /// Keep the existing source file and cache
        #[arg(long)]
        no_truncate: bool,

        /// Upstream interaction server
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Stop the producer
    Stop,

    /// Stop, then force-start the producer
    Restart {
        /// Keep the existing source file and cache
        #[arg(long)]
        no_truncate: bool,

        /// Upstream interaction server
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Show producer status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the most recent events
    Last {
        /// Number of events to show
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Follow live events (like tail -f)
    Tail {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("interactview")
        .join("logs")
        .join("interactview.log")
}

/// Generate the after_help text with runtime checks
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    help.push_str("Container Runtimes:\n");
    for tool in check_runtimes() {
        let icon = if tool.available { "\u{2705}" } else { "\u{274C}" };
        let version = tool.version.as_deref().unwrap_or("not found");
        help.push_str(&format!("  {} {:<10} {}\n", icon, tool.name, version));
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for status/event commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::try_parse_from(["iv"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_start() {
        let cli = Cli::try_parse_from(["iv", "start", "--force", "--server", "https://oast.live"]).unwrap();
        match cli.command {
            Some(Command::Start {
                force,
                no_truncate,
                server,
            }) => {
                assert!(force);
                assert!(!no_truncate);
                assert_eq!(server.as_deref(), Some("https://oast.live"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_restart_no_truncate() {
        let cli = Cli::try_parse_from(["iv", "restart", "--no-truncate"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Restart { no_truncate: true, .. })));
    }

    #[test]
    fn test_cli_parse_status_json() {
        let cli = Cli::try_parse_from(["iv", "status", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Status {
                format: OutputFormat::Json
            })
        ));
    }

    #[test]
    fn test_cli_parse_last() {
        let cli = Cli::try_parse_from(["iv", "last", "-n", "5"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Last { lines: 5, .. })));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from(["iv", "tail", "--url", "http://10.0.0.2:5000", "-l", "debug"]).unwrap();
        assert_eq!(cli.url.as_deref(), Some("http://10.0.0.2:5000"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
