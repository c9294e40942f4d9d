//! CLI argument definitions
//!
//! All Clap derive structs for `coilmq` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::{QueuePolicy, StoreBackend, SubscriberPolicy};
use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Lightweight STOMP message broker.
#[derive(Parser, Debug)]
#[command(name = "coilmq", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "COILMQ_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "COILMQ_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the broker.
    Run(RunArgs),

    /// Validate configuration files without starting the broker.
    Validate(ValidateArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
///
/// Flags override the matching configuration file settings.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to YAML configuration file.
    #[arg(short, long, env = "COILMQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on, as `host:port`.
    #[arg(short, long, env = "COILMQ_LISTEN")]
    pub listen: Option<String>,

    /// Queue storage backend.
    #[arg(long, env = "COILMQ_STORE")]
    pub store: Option<StoreBackend>,

    /// Database file for the sqlite store.
    #[arg(long, env = "COILMQ_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Subscriber selection policy for queue messages.
    #[arg(long)]
    pub subscriber_scheduler: Option<SubscriberPolicy>,

    /// Backlog selection policy for freed subscribers.
    #[arg(long)]
    pub queue_scheduler: Option<QueuePolicy>,

    /// YAML file of `login: passcode` pairs; enables authentication.
    #[arg(long, env = "COILMQ_USERS_FILE")]
    pub users_file: Option<PathBuf>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "COILMQ_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Write structured JSONL events to this file.
    #[arg(long, env = "COILMQ_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for shell completion generation.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script.
    pub shell: clap_complete::Shell,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_run_with_config() {
        let cli = Cli::try_parse_from(["coilmq", "run", "--config", "coilmq.yaml"]);
        assert!(cli.is_ok(), "Failed to parse: {cli:?}");
    }

    #[test]
    fn test_run_overrides_parse() {
        let args = run_args(&[
            "coilmq",
            "run",
            "--listen",
            "0.0.0.0:61613",
            "--store",
            "sqlite",
            "--store-path",
            "/tmp/q.db",
            "--subscriber-scheduler",
            "random",
            "--queue-scheduler",
            "largest",
            "--metrics-port",
            "9090",
        ]);
        assert_eq!(args.listen.as_deref(), Some("0.0.0.0:61613"));
        assert_eq!(args.store, Some(StoreBackend::Sqlite));
        assert_eq!(args.subscriber_scheduler, Some(SubscriberPolicy::Random));
        assert_eq!(args.queue_scheduler, Some(QueuePolicy::Largest));
        assert_eq!(args.metrics_port, Some(9090));
    }

    #[test]
    fn test_unknown_store_rejected() {
        let cli = Cli::try_parse_from(["coilmq", "run", "--store", "postgres"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["coilmq", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_output() {
        let err = Cli::try_parse_from(["coilmq", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["coilmq", "validate"]).is_err());
    }

    #[test]
    fn test_color_choices_parse() {
        for variant in ["auto", "always", "never"] {
            let cli = Cli::try_parse_from(["coilmq", "--color", variant, "version"]);
            assert!(cli.is_ok(), "Failed to parse color={variant}");
        }
    }

    #[test]
    fn test_completions_shells_parse() {
        for shell in ["bash", "zsh", "fish", "elvish"] {
            let cli = Cli::try_parse_from(["coilmq", "completions", shell]);
            assert!(cli.is_ok(), "Failed to parse shell={shell}");
        }
    }

    #[test]
    fn test_verbose_and_quiet() {
        let cli = Cli::try_parse_from(["coilmq", "-vvv", "--quiet", "version"]).unwrap();
        assert_eq!(cli.verbose, 3);
        assert!(cli.quiet);
    }

    #[test]
    fn test_log_format_parse() {
        let cli = Cli::try_parse_from(["coilmq", "--log-format", "json", "version"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
