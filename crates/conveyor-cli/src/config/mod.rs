//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── serve     # NatsConfig, TopologyConfig, WorkerConfig, DeadLetterConfig, HttpConfig
//! ├── invoke    # NatsConfig, TopologyConfig, workflow id and payload
//! ├── validate  # definition files
//! └── log       # NatsConfig, run id, optional definition file
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.
//!
//! # Example
//!
//! ```bash
//! conveyor serve --definitions-dir ./workflows --nats-url nats://127.0.0.1:4222
//!
//! # Or via environment variables
//! CONVEYOR_DEFINITIONS_DIR=./workflows NATS_URL=nats://127.0.0.1:4222 conveyor serve
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use conveyor_nats::dead_letter::DeadLetterConfig;
use conveyor_nats::{NatsConfig, TopologyConfig};
use conveyor_worker::http::HttpConfig;
use conveyor_worker::pipeline::WorkerConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::TRACING_TARGET_STARTUP;

/// Default graceful shutdown timeout in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "conveyor")]
#[command(about = "Queue-driven workflow execution engine")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, env = "CONVEYOR_LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the execution, invocation and retry workers.
    Serve(ServeArgs),
    /// Publish a run invocation.
    Invoke(InvokeArgs),
    /// Validate workflow definition files.
    Validate(ValidateArgs),
    /// Print the execution log of a run from the run ledger.
    Log(LogArgs),
}

/// Arguments of `conveyor serve`.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Directory of workflow definition `*.json` files
    #[arg(long, env = "CONVEYOR_DEFINITIONS_DIR")]
    pub definitions_dir: PathBuf,

    /// Seconds to wait for in-flight messages on shutdown
    #[arg(long, env = "CONVEYOR_SHUTDOWN_TIMEOUT_SECS", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout_secs: u64,

    #[clap(flatten)]
    pub nats: NatsConfig,

    #[clap(flatten)]
    pub topology: TopologyConfig,

    #[clap(flatten)]
    pub worker: WorkerConfig,

    #[clap(flatten)]
    pub dead_letter: DeadLetterConfig,

    #[clap(flatten)]
    pub http: HttpConfig,
}

/// Arguments of `conveyor invoke`.
#[derive(Debug, Clone, Args)]
pub struct InvokeArgs {
    /// Workflow to run
    pub workflow_id: String,

    /// Correlation id of the run; generated when omitted
    #[arg(long)]
    pub run_id: Option<String>,

    /// Initial payload as a JSON object
    #[arg(long, default_value = "{}")]
    pub payload: String,

    #[clap(flatten)]
    pub nats: NatsConfig,

    #[clap(flatten)]
    pub topology: TopologyConfig,
}

/// Arguments of `conveyor validate`.
#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    /// Definition files or directories of `*.json` files
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Arguments of `conveyor log`.
#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Correlation id of the run
    pub run_id: String,

    /// Definition file of the run's workflow, to report the run status
    #[arg(long)]
    pub definition: Option<PathBuf>,

    #[clap(flatten)]
    pub nats: NatsConfig,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);

        if self.log_json {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    /// Logs build information at debug level.
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "conveyor",
            "serve",
            "--definitions-dir",
            "./workflows",
            "--max-retries",
            "5",
            "--action-endpoint",
            "enrich=http://enricher.internal/run",
        ])
        .unwrap();

        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.dead_letter.max_retries, 5);
        assert_eq!(args.http.action_endpoints.len(), 1);
        assert_eq!(args.worker.max_concurrent_steps, 10);
    }

    #[test]
    fn test_parse_invoke() {
        let cli = Cli::try_parse_from([
            "conveyor",
            "invoke",
            "meeting-follow-up",
            "--payload",
            r#"{"email":"ada@example.com"}"#,
        ])
        .unwrap();

        let Command::Invoke(args) = cli.command else {
            panic!("expected invoke");
        };
        assert_eq!(args.workflow_id, "meeting-follow-up");
        assert!(args.run_id.is_none());
    }

    #[test]
    fn test_parse_log() {
        let cli = Cli::try_parse_from(["conveyor", "log", "run-1"]).unwrap();
        let Command::Log(args) = cli.command else {
            panic!("expected log");
        };
        assert_eq!(args.run_id, "run-1");
    }
}
