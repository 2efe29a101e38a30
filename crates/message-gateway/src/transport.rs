//! Transport seam between the gateway and a visibility-timeout queue backend.
//!
//! A [`QueueTransport`] is long-lived and shared; every gateway operation asks
//! it for a fresh [`TransportSession`] and drops that session before
//! returning, whatever the outcome.

use crate::codec::{Attributes, Envelope};
use crate::config::{GatewayConfig, ProviderKind};
use crate::error::GatewayError;
use crate::message::{QueueAddress, ReceiptHandle};
use crate::providers::{InMemoryTransport, SqsTransport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// Backend implementations available to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    InMemory,
}

impl ProviderType {
    /// Largest payload the backend accepts, in bytes
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,
            Self::InMemory => 10 * 1024 * 1024,
        }
    }

    /// Longest long-poll wait the backend honours, in seconds
    pub fn max_wait_seconds(&self) -> u32 {
        match self {
            Self::AwsSqs => 20,
            Self::InMemory => u32::MAX,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwsSqs => write!(f, "AwsSqs"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Backend call kinds, used to label failures and test hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOperation {
    Send,
    Receive,
    Delete,
    ChangeVisibility,
    Purge,
}

impl fmt::Display for TransportOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Delete => "delete",
            Self::ChangeVisibility => "change_visibility",
            Self::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// Parameters of a single receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: u32,
    pub wait_time_seconds: u32,
}

impl ReceiveRequest {
    /// Ask for one message, waiting up to `timeout_ms` rounded down to seconds
    pub fn single(timeout_ms: u64) -> Self {
        let seconds = timeout_ms / 1000;
        Self {
            max_messages: 1,
            wait_time_seconds: u32::try_from(seconds).unwrap_or(u32::MAX),
        }
    }
}

/// A message as handed out by the backend, still in transport form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend-assigned message id, when the backend reports one
    pub native_id: Option<String>,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    pub attributes: Attributes,
    /// How many times the backend has delivered this entry
    pub receive_count: Option<u32>,
}

/// Factory for short-lived backend sessions
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Open a session; it is released when dropped
    async fn connect(&self) -> Result<Box<dyn TransportSession>, GatewayError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Backend operations available within one session
#[async_trait]
pub trait TransportSession: Send {
    /// Check an envelope against the backend's send limits without sending it
    fn validate(&self, queue: &QueueAddress, envelope: &Envelope) -> Result<(), GatewayError>;

    /// Enqueue an envelope, returning the backend message id
    async fn send(&self, queue: &QueueAddress, envelope: &Envelope)
        -> Result<String, GatewayError>;

    /// Poll for a delivery; `Ok(None)` when nothing arrived within the wait
    async fn receive(
        &self,
        queue: &QueueAddress,
        request: ReceiveRequest,
    ) -> Result<Option<Delivery>, GatewayError>;

    /// Permanently remove the entry behind a receipt handle
    async fn delete(&self, queue: &QueueAddress, receipt: &ReceiptHandle)
        -> Result<(), GatewayError>;

    /// Reset the remaining invisibility of an in-flight entry
    async fn change_visibility(
        &self,
        queue: &QueueAddress,
        receipt: &ReceiptHandle,
        visibility_timeout_seconds: u32,
    ) -> Result<(), GatewayError>;

    /// Remove every entry from the queue
    async fn purge(&self, queue: &QueueAddress) -> Result<(), GatewayError>;
}

/// Builds the transport selected by configuration
pub struct TransportFactory;

impl TransportFactory {
    pub fn create(config: &GatewayConfig) -> Result<Arc<dyn QueueTransport>, GatewayError> {
        config.validate()?;

        let transport: Arc<dyn QueueTransport> = match config.provider {
            ProviderKind::AwsSqs => Arc::new(SqsTransport::new(config.sqs.clone())?),
            ProviderKind::InMemory => Arc::new(InMemoryTransport::new(config.memory.clone())),
        };

        Ok(transport)
    }
}
