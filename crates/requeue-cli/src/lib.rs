//! # Requeue CLI
//!
//! Command-line interface for returning dead-lettered messages from an error
//! queue to the queue they failed from.
//!
//! This module provides:
//! - Argument parsing
//! - Layered configuration loading
//! - Logging initialisation
//! - Exit code mapping for errors

use clap::{Parser, Subcommand};
use requeue_core::{ConsoleSink, OutputSink, RequeueError, RequeueOperator, RequeueSettings};
use requeue_runtime::{
    ConfigurationError, DirectFormatResolver, MessageId, QueueError, QueueProviderFactory,
    XmlHeaderCodec,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Prefix of environment variables overriding configuration keys
pub const ENV_PREFIX: &str = "REQUEUE";

// ============================================================================
// CLI Structure
// ============================================================================

/// Requeue - return dead-lettered messages to their source queue
#[derive(Parser, Debug)]
#[command(name = "requeue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Return messages from an error queue to the queue they failed from")]
#[command(
    long_about = "Moves messages from an error queue back to the queue named in their FailedQ \
                  header, one transaction per message"
)]
pub struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "REQUEUE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Address of the error queue, `queue` or `queue@machine`
    #[arg(short, long, global = true)]
    pub input_queue: Option<String>,

    /// Skip the transactional check on the input queue
    #[arg(long, global = true)]
    pub clustered: bool,

    /// Seconds to wait for a message by id before scanning headers
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Root directory of the filesystem queue store
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Return every message in the error queue
    ReturnAll,

    /// Return one message, found by id or by its original id header
    Return {
        /// Id of the message in the error queue, or its original id
        message_id: String,
    },

    /// Print the resolved configuration as TOML
    ShowConfig,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{0}")]
    Requeue(#[from] RequeueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for the error
    ///
    /// 1 configuration, 2 queue access, 3 invalid argument, 4 I/O.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Logging { .. } => 1,
            Self::Requeue(e) if e.is_configuration() => 1,
            Self::Requeue(RequeueError::Queue(QueueError::Io { .. })) => 4,
            Self::Requeue(_) => 2,
            Self::InvalidArgument { .. } => 3,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{0}")]
    Validation(#[from] ConfigurationError),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    run(cli, Arc::new(ConsoleSink::stdout())).await
}

/// Execute parsed arguments, writing operator lines to `sink`
pub async fn run(cli: Cli, sink: Arc<dyn OutputSink>) -> Result<(), CliError> {
    match &cli.command {
        Commands::ReturnAll => {
            let operator = build_operator(&cli, sink).await?;
            execute_return_all_command(&operator).await
        }
        Commands::Return { message_id } => {
            let operator = build_operator(&cli, sink).await?;
            execute_return_command(&operator, message_id).await
        }
        Commands::ShowConfig => execute_show_config_command(&cli),
    }
}

async fn build_operator(
    cli: &Cli,
    sink: Arc<dyn OutputSink>,
) -> Result<RequeueOperator, CliError> {
    let settings = load_configuration(cli)?;

    let provider = QueueProviderFactory::create_provider(&settings.provider)
        .await
        .map_err(RequeueError::from)?;

    Ok(RequeueOperator::new(
        &settings,
        provider,
        Arc::new(XmlHeaderCodec::new()),
        Arc::new(DirectFormatResolver::new(settings.local_machine.clone())),
        sink,
    )
    .await?)
}

/// Initialize logging based on CLI arguments
///
/// Logs go to stderr so they never mix with the operator lines on stdout.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "--log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Load and validate settings
pub fn load_configuration(cli: &Cli) -> Result<RequeueSettings, ConfigError> {
    let settings = resolve_configuration(cli)?;
    settings.validate()?;

    Ok(settings)
}

/// Merge settings, lowest to highest precedence: built-in defaults, the TOML
/// file, `REQUEUE__*` environment variables, command-line flags
pub fn resolve_configuration(cli: &Cli) -> Result<RequeueSettings, ConfigError> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&RequeueSettings::default())?);

    if let Some(path) = &cli.config {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound { path: path.clone() });
        }
        info!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(
            config::File::from(path.as_path())
                .format(config::FileFormat::Toml)
                .required(true),
        );
    }

    builder = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("input_queue", cli.input_queue.clone())?
        .set_override_option("receive_timeout_seconds", cli.timeout)?
        .set_override_option(
            "provider.root",
            cli.root.as_ref().map(|root| root.display().to_string()),
        )?;

    if cli.clustered {
        builder = builder.set_override("clustered", true)?;
    }

    Ok(builder.build()?.try_deserialize()?)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute return-all command
async fn execute_return_all_command(operator: &RequeueOperator) -> Result<(), CliError> {
    info!(input_queue = %operator.input_queue(), "Returning all messages");

    let report = operator.return_all().await?;

    info!(
        attempted = report.attempted,
        returned = report.returned,
        skipped = report.skipped,
        failed = report.failed,
        "Return-all finished"
    );
    Ok(())
}

/// Execute show-config command
fn execute_show_config_command(cli: &Cli) -> Result<(), CliError> {
    let settings = resolve_configuration(cli)?;
    let rendered = toml::to_string_pretty(&settings).map_err(ConfigError::from)?;

    print!("{}", rendered);
    Ok(())
}

/// Execute return command
async fn execute_return_command(
    operator: &RequeueOperator,
    message_id: &str,
) -> Result<(), CliError> {
    let id = MessageId::from_str(message_id).map_err(|e| CliError::InvalidArgument {
        arg: "MESSAGE_ID".to_string(),
        message: e.to_string(),
    })?;

    info!(message_id = %id, input_queue = %operator.input_queue(), "Returning message");

    let outcome = operator.return_message_to_source_queue(&id).await?;

    info!(message_id = %id, outcome = ?outcome, "Return finished");
    Ok(())
}
