//! Gateway configuration.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. An optional file (format chosen by extension: toml, yaml or json)
//! 3. Environment variables prefixed `GATEWAY__` with `__` between levels,
//!    e.g. `GATEWAY__SQS__REGION=eu-west-1` sets `sqs.region`

use crate::codec::BodyEncoding;
use crate::error::{ConfigurationError, ValidationError};
use crate::message::QueueAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables read by [`GatewayConfig::load`]
pub const ENV_PREFIX: &str = "GATEWAY";

const REDACTED: &str = "<REDACTED>";

/// Backend selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    AwsSqs,
    InMemory,
}

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Backend to talk to
    pub provider: ProviderKind,

    /// Queue name or queue URL
    pub queue: String,

    /// Default long-poll budget for receive, in milliseconds
    pub receive_timeout_ms: u64,

    /// Payload layout on the wire
    pub body_encoding: BodyEncoding,

    /// SQS transport settings
    pub sqs: SqsConfig,

    /// In-memory transport settings
    pub memory: InMemoryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            queue: String::new(),
            receive_timeout_ms: 1000,
            body_encoding: BodyEncoding::default(),
            sqs: SqsConfig::default(),
            memory: InMemoryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: GatewayConfig = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.queue.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "queue".to_string(),
            });
        }

        self.queue_address()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("queue: {}", e),
            })?;

        if self.provider == ProviderKind::AwsSqs {
            self.sqs.validate()?;
        }

        Ok(())
    }

    /// Parse the configured queue into an address
    pub fn queue_address(&self) -> Result<QueueAddress, ValidationError> {
        QueueAddress::parse(self.queue.trim())
    }

    /// Copy of the configuration with credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.sqs.access_key_id.is_some() {
            config.sqs.access_key_id = Some(REDACTED.to_string());
        }
        if config.sqs.secret_access_key.is_some() {
            config.sqs.secret_access_key = Some(REDACTED.to_string());
        }
        config
    }
}

/// SQS transport configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    /// AWS region, used for the default endpoint and request signing
    pub region: String,

    /// Endpoint override for SQS-compatible services such as LocalStack
    pub endpoint: Option<String>,

    /// Access key id; falls back to `AWS_ACCESS_KEY_ID`
    pub access_key_id: Option<String>,

    /// Secret access key; falls back to `AWS_SECRET_ACCESS_KEY`
    pub secret_access_key: Option<String>,

    /// HTTP request timeout in seconds; must exceed the long-poll wait
    pub request_timeout_secs: u64,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            request_timeout_secs: 30,
        }
    }
}

impl SqsConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "sqs.region cannot be empty".to_string(),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigurationError::Invalid {
                message: "sqs.request_timeout_secs must be greater than zero".to_string(),
            });
        }

        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
                message: format!("sqs.endpoint '{}' is not a valid URL: {}", endpoint, e),
            })?;
        }

        Ok(())
    }

    /// Endpoint to send requests to
    pub fn resolved_endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://sqs.{}.amazonaws.com", self.region),
        }
    }
}

impl fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| REDACTED))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| REDACTED),
            )
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// In-memory transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// How long a received entry stays hidden, in milliseconds
    pub visibility_timeout_ms: u64,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
        }
    }
}
