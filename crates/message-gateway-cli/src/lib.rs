//! # Message Gateway CLI
//!
//! Command-line interface for sending, receiving and purging messages on the
//! configured queue.
//!
//! Configuration comes from an optional file plus `GATEWAY__*` environment
//! variables. Logs go to stderr so command output on stdout stays parseable.

use clap::{Parser, Subcommand};
use message_gateway::{
    ConfigurationError, Gateway, GatewayConfig, GatewayError, Message, MessageBody,
    MessageConsumer, MessageHeader, MessageId, MessageProducer, MessageType, SerializationError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Message gateway CLI
#[derive(Debug, Parser)]
#[command(name = "gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send and receive messages through a visibility-timeout queue")]
pub struct Cli {
    /// Configuration file path (toml, yaml or json)
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive
    #[arg(short, long, default_value = "warn")]
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
    /// Send a message to the queue
    Send {
        /// Message topic
        #[arg(short, long)]
        topic: String,

        /// Message type (command, event, document or none)
        #[arg(short, long, default_value = "command")]
        message_type: String,

        /// Message id; a new one is generated when omitted
        #[arg(long)]
        id: Option<String>,

        /// Correlation id
        #[arg(long)]
        correlation_id: Option<String>,

        /// Extra header entries as KEY=VALUE
        #[arg(long = "header", value_name = "KEY=VALUE")]
        headers: Vec<String>,

        /// Message body
        body: String,
    },

    /// Receive one message and print it as JSON
    Receive {
        /// How long to wait for a message; defaults to the configured value
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Acknowledge the message after printing it
        #[arg(long, conflicts_with_all = ["reject", "discard", "requeue"])]
        ack: bool,

        /// Reject the message, making it visible again
        #[arg(long, conflicts_with_all = ["discard", "requeue"])]
        reject: bool,

        /// Reject the message without requeue, deleting it
        #[arg(long, conflicts_with = "requeue")]
        discard: bool,

        /// Delete the message and enqueue a fresh copy
        #[arg(long)]
        requeue: bool,
    },

    /// Remove every message from the queue
    Purge {
        /// Confirm the purge
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the resolved configuration with secrets redacted
    Config,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Gateway error: {0}")]
    Gateway(GatewayError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GatewayError> for CliError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::ConfigurationError(e) => Self::Configuration(e),
            other => Self::Gateway(other),
        }
    }
}

impl CliError {
    /// Process exit code for the error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Gateway(_) => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Io(_) => 4,
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// JSON view of a received message
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub topic: String,
    pub message_type: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub handled_count: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_handle: Option<String>,
    pub body: String,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        let header = message.header();
        Self {
            id: message.id().to_string(),
            topic: header.topic().to_string(),
            message_type: header.message_type().to_string(),
            timestamp: header.timestamp().to_string(),
            correlation_id: header.correlation_id().map(str::to_string),
            handled_count: header.handled_count(),
            headers: header.bag().extensions().clone(),
            receipt_handle: message.receipt_handle().map(|r| r.to_string()),
            body: message.body().as_str().to_string(),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CliError::from(GatewayError::from(SerializationError::from(e))))
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Parse arguments from the process and run the selected command
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;
    run(cli).await
}

/// Run a parsed command
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_configuration(cli.config.as_deref())?;

    match cli.command {
        Commands::Send {
            topic,
            message_type,
            id,
            correlation_id,
            headers,
            body,
        } => {
            let message = build_message(
                &topic,
                &message_type,
                id.as_deref(),
                correlation_id,
                &headers,
                body,
            )?;
            execute_send_command(&config, &message).await
        }
        Commands::Receive {
            timeout_ms,
            ack,
            reject,
            discard,
            requeue,
        } => {
            let action = match (ack, reject, discard, requeue) {
                (true, _, _, _) => Settlement::Acknowledge,
                (_, true, _, _) => Settlement::Reject,
                (_, _, true, _) => Settlement::Discard,
                (_, _, _, true) => Settlement::Requeue,
                _ => Settlement::Leave,
            };
            let timeout_ms = timeout_ms.unwrap_or(config.receive_timeout_ms);
            execute_receive_command(&config, timeout_ms, action).await
        }
        Commands::Purge { yes } => execute_purge_command(&config, yes).await,
        Commands::Config => execute_config_command(&config),
    }
}

/// What to do with a message after printing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Leave,
    Acknowledge,
    Reject,
    Discard,
    Requeue,
}

fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_configuration(path: Option<&Path>) -> Result<GatewayConfig, CliError> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigurationError::Missing {
                key: format!("config file {}", path.display()),
            }
            .into());
        }
    }

    let config = GatewayConfig::load(path)?;
    debug!(provider = ?config.provider, queue = %config.queue, "Loaded configuration");
    Ok(config)
}

/// Assemble a message from command-line arguments
pub fn build_message(
    topic: &str,
    message_type: &str,
    id: Option<&str>,
    correlation_id: Option<String>,
    headers: &[String],
    body: String,
) -> Result<Message, CliError> {
    let message_type: MessageType =
        message_type
            .parse()
            .map_err(|e: message_gateway::ValidationError| CliError::InvalidArgument {
                arg: "message-type".to_string(),
                message: e.to_string(),
            })?;

    let id = match id {
        Some(id) => id.parse().map_err(|e: message_gateway::ValidationError| {
            CliError::InvalidArgument {
                arg: "id".to_string(),
                message: e.to_string(),
            }
        })?,
        None => MessageId::new(),
    };

    let mut header = MessageHeader::new(id, topic, message_type);
    if let Some(correlation_id) = correlation_id {
        header = header.with_correlation_id(correlation_id);
    }

    for entry in headers {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| CliError::InvalidArgument {
                arg: "header".to_string(),
                message: format!("'{}' is not KEY=VALUE", entry),
            })?;
        header
            .bag_mut()
            .insert(key.trim(), value)
            .map_err(|e| CliError::InvalidArgument {
                arg: "header".to_string(),
                message: e.to_string(),
            })?;
    }

    Ok(Message::new(header, MessageBody::new(body)))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_send_command(config: &GatewayConfig, message: &Message) -> Result<(), CliError> {
    let gateway = Gateway::from_config(config)?;
    info!(
        queue = %gateway.queue(),
        message_id = %message.id(),
        topic = %message.header().topic(),
        "Sending message"
    );

    gateway.producer().send(message).await?;
    println!("{}", message.id());
    Ok(())
}

async fn execute_receive_command(
    config: &GatewayConfig,
    timeout_ms: u64,
    action: Settlement,
) -> Result<(), CliError> {
    let gateway = Gateway::from_config(config)?;
    let consumer = gateway.consumer();

    let message = consumer.receive(timeout_ms).await;
    if message.is_empty() {
        println!("No message available on {}", gateway.queue());
        return Ok(());
    }

    println!("{}", to_json(&MessageView::from(&message))?);

    match action {
        Settlement::Leave => {}
        Settlement::Acknowledge => consumer.acknowledge(&message).await?,
        Settlement::Reject => consumer.reject(&message, true).await?,
        Settlement::Discard => consumer.reject(&message, false).await?,
        Settlement::Requeue => consumer.requeue(&message).await?,
    }
    Ok(())
}

async fn execute_purge_command(config: &GatewayConfig, yes: bool) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::InvalidArgument {
            arg: "yes".to_string(),
            message: "purge removes every message; pass --yes to confirm".to_string(),
        });
    }

    let gateway = Gateway::from_config(config)?;
    gateway.consumer().purge().await?;
    println!("Purged {}", gateway.queue());
    Ok(())
}

fn execute_config_command(config: &GatewayConfig) -> Result<(), CliError> {
    println!("{}", to_json(&config.redacted())?);
    Ok(())
}
