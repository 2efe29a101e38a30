//! # Message Gateway
//!
//! Messaging gateway over a visibility-timeout queue such as AWS SQS.
//!
//! This library provides:
//! - A typed message model with a header bag for application extensions
//! - An attribute codec mapping messages to transport attributes and payload
//! - A consumer with receive, acknowledge, reject, requeue and purge
//! - A producer that enqueues messages
//! - Factories producing named input channels
//!
//! ## Module Organization
//!
//! - [`message`] - Message, header, bag and identifier types
//! - [`error`] - Error types for all gateway operations
//! - [`codec`] - Attribute codec and transport envelope
//! - [`transport`] - Backend seam and transport factory
//! - [`providers`] - SQS and in-memory backends
//! - [`consumer`] / [`producer`] - Gateway operations
//! - [`channel`] - Consumer and channel factories
//! - [`config`] - Layered configuration

pub mod channel;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;
pub mod providers;
pub mod transport;

pub use channel::{ChannelFactory, ConsumerFactory, InputChannel, QueueChannelFactory};
pub use codec::{AttributeCodec, BodyEncoding, Envelope};
pub use config::{GatewayConfig, InMemoryConfig, ProviderKind, SqsConfig};
pub use consumer::{MessageConsumer, QueueConsumer};
pub use error::{ConfigurationError, GatewayError, SerializationError, ValidationError};
pub use message::{
    HeaderBag, Message, MessageBody, MessageHeader, MessageId, MessageType, QueueAddress,
    QueueName, ReceiptHandle, Timestamp,
};
pub use producer::{MessageProducer, QueueProducer};
pub use providers::{InMemoryTransport, SqsTransport};
pub use transport::{ProviderType, QueueTransport, TransportFactory, TransportSession};

use std::sync::Arc;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Consumer, producer and channel factory sharing one transport
///
/// Built from a [`GatewayConfig`]; every part talks to the configured queue
/// with the configured body encoding.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn QueueTransport>,
    queue: QueueAddress,
    codec: AttributeCodec,
}

impl Gateway {
    /// Build the transport described by `config` and bind it to its queue
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let transport = TransportFactory::create(config)?;
        let queue = config.queue_address()?;
        Ok(Self::new(
            transport,
            queue,
            AttributeCodec::new(config.body_encoding),
        ))
    }

    pub fn new(
        transport: Arc<dyn QueueTransport>,
        queue: QueueAddress,
        codec: AttributeCodec,
    ) -> Self {
        Self {
            transport,
            queue,
            codec,
        }
    }

    pub fn queue(&self) -> &QueueAddress {
        &self.queue
    }

    pub fn provider_type(&self) -> ProviderType {
        self.transport.provider_type()
    }

    pub fn consumer(&self) -> QueueConsumer {
        QueueConsumer::new(Arc::clone(&self.transport), self.queue.clone(), self.codec)
    }

    pub fn producer(&self) -> QueueProducer {
        QueueProducer::new(Arc::clone(&self.transport), self.queue.clone(), self.codec)
    }

    pub fn channel_factory(&self) -> QueueChannelFactory {
        QueueChannelFactory::new(ConsumerFactory::new(
            Arc::clone(&self.transport),
            self.codec,
        ))
    }
}
