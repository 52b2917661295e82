//! # Queue-Pool CLI
//!
//! Command-line interface over the pooled queue factories.
//!
//! This module provides CLI commands for:
//! - Provisioning storage queues concurrently
//! - Sending a message through a pooled Service Bus sender
//! - Validating messaging configuration

use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use queue_pool::config::MessagingConfig;
use queue_pool::providers::{
    InMemoryClientFactory, ServiceBusClientFactory, ServiceBusMessage, StorageQueueClientFactory,
};
use queue_pool::validation::require_not_empty;
use queue_pool::{
    with_timeout, ClientFactory, ClientProvider, ConfigurationError, PoolError, QueueClient,
    QueueFactory, SenderFactory,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Pool CLI - pooled queue provisioning and sending
#[derive(Debug, Parser)]
#[command(name = "queue-pool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision queues and send messages through pooled clients")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_POOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create queues that do not exist yet
    Provision {
        /// Queue names
        #[arg(required = true)]
        names: Vec<String>,

        /// Backend to provision against
        #[arg(short, long, value_enum, default_value = "storage")]
        backend: Backend,

        /// Per-queue timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Send one message to a Service Bus queue
    Send {
        /// Queue name
        queue: String,

        /// Message body
        body: String,

        /// Broker message id
        #[arg(long)]
        message_id: Option<String>,

        /// Content type of the body
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Validate configuration by building both backend clients
    CheckConfig {
        /// Print the resolved configuration with secrets redacted
        #[arg(short, long)]
        show: bool,
    },
}

/// Provisioning backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Storage queues from the messaging configuration
    Storage,
    /// In-process queues for local development
    Memory,
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// One JSON document
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Pool(PoolError::Configuration(_)) => 1,
            Self::Pool(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Provisioning Report
// ============================================================================

/// Outcome of provisioning one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub queue: String,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProvisionReport {
    fn from_result<T>(queue: &str, result: Result<T, PoolError>) -> Self {
        match result {
            Ok(_) => Self {
                queue: queue.to_string(),
                ready: true,
                error: None,
            },
            Err(e) => Self {
                queue: queue.to_string(),
                ready: false,
                error: Some(e.to_string()),
            },
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;
    run(cli, &mut std::io::stdout()).await
}

/// Execute a parsed command line, writing command output to `out`
pub async fn run(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    match cli.command {
        Commands::Provision {
            names,
            backend,
            timeout,
            format,
        } => {
            let timeout = timeout.map(Duration::from_secs);
            let reports = match backend {
                Backend::Storage => {
                    let config = MessagingConfig::load(cli.config.as_deref())?;
                    let factory = queue_factory(StorageQueueClientFactory::new(config));
                    provision_all(&factory, &names, timeout).await?
                }
                Backend::Memory => {
                    let factory = queue_factory(InMemoryClientFactory::new());
                    provision_all(&factory, &names, timeout).await?
                }
            };
            write_reports(out, &reports, format)?;

            let failed = reports.iter().filter(|r| !r.ready).count();
            if failed > 0 {
                return Err(CliError::CommandFailed {
                    message: format!("{} of {} queues failed to provision", failed, reports.len()),
                });
            }
            Ok(())
        }
        Commands::Send {
            queue,
            body,
            message_id,
            content_type,
        } => {
            let config = MessagingConfig::load(cli.config.as_deref())?;
            let clients = Arc::new(ClientProvider::from_factory(ServiceBusClientFactory::new(
                config,
            )));
            let senders = SenderFactory::new(clients);

            let mut message = ServiceBusMessage::new(body);
            if let Some(id) = message_id {
                message = message.with_message_id(id);
            }
            if let Some(content_type) = content_type {
                message = message.with_content_type(content_type);
            }

            senders.get_sender(&queue)?.send(&message).await?;
            writeln!(out, "{}: sent", queue)?;
            Ok(())
        }
        Commands::CheckConfig { show } => {
            let config = MessagingConfig::load(cli.config.as_deref())?;
            if show {
                writeln!(out, "{:#?}", config)?;
            }
            check_config(config, out)
        }
    }
}

/// Initialize logging based on CLI arguments
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("Failed to initialize logging: {}", e),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

fn queue_factory<F>(factory: F) -> QueueFactory<F::Client>
where
    F: ClientFactory + 'static,
    F::Client: QueueClient,
{
    QueueFactory::new(Arc::new(ClientProvider::from_factory(factory)))
}

/// Provision every name concurrently, one report per name in input order.
///
/// Repeated names share one provisioning attempt. Fails without reports only
/// when `names` contains an empty name.
pub async fn provision_all<C: QueueClient>(
    factory: &QueueFactory<C>,
    names: &[String],
    timeout: Option<Duration>,
) -> Result<Vec<ProvisionReport>, CliError> {
    for (index, name) in names.iter().enumerate() {
        require_not_empty(Some(name.as_str()), "name").map_err(|e| CliError::InvalidArgument {
            arg: format!("names[{}]", index),
            message: e.to_string(),
        })?;
    }

    let attempts = names.iter().map(|name| async move {
        let result = match timeout {
            Some(limit) => with_timeout(limit, factory.get_queue(name)).await,
            None => factory.get_queue(name).await,
        };
        if let Err(e) = &result {
            warn!(queue = %name, error = %e, "Provisioning failed");
        }
        ProvisionReport::from_result(name, result)
    });

    let reports = join_all(attempts).await;
    info!(
        total = reports.len(),
        ready = reports.iter().filter(|r| r.ready).count(),
        "Provisioning finished"
    );
    Ok(reports)
}

fn write_reports(
    out: &mut impl Write,
    reports: &[ProvisionReport],
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => {
            for report in reports {
                match &report.error {
                    None => writeln!(out, "{}: ready", report.queue)?,
                    Some(e) => writeln!(out, "{}: failed: {}", report.queue, e)?,
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(reports).map_err(|e| CliError::CommandFailed {
                message: format!("Failed to encode report: {}", e),
            })?;
            writeln!(out, "{}", json)?;
        }
    }
    Ok(())
}

/// Build both backend clients, reporting each. Fails with the first
/// configuration error.
fn check_config(config: MessagingConfig, out: &mut impl Write) -> Result<(), CliError> {
    let service_bus = ServiceBusClientFactory::new(config.clone()).create_client();
    let storage = StorageQueueClientFactory::new(config).create_client();

    let mut first_error = None;
    for (backend, result) in [
        ("service bus", service_bus.map(|_| ())),
        ("storage queue", storage.map(|_| ())),
    ] {
        match result {
            Ok(()) => writeln!(out, "{}: ok", backend)?,
            Err(e) => {
                writeln!(out, "{}: {}", backend, e)?;
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
