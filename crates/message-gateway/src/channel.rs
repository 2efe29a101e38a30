//! Channel and consumer construction.
//!
//! A channel is a named consumer. Each call builds a new, independent
//! consumer; the routing key is carried for callers but has no effect on a
//! point-to-point queue.

use crate::codec::AttributeCodec;
use crate::consumer::{MessageConsumer, QueueConsumer};
use crate::error::GatewayError;
use crate::message::{Message, QueueAddress};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

/// Builds consumers bound to a queue
#[derive(Clone)]
pub struct ConsumerFactory {
    transport: Arc<dyn QueueTransport>,
    codec: AttributeCodec,
}

impl ConsumerFactory {
    pub fn new(transport: Arc<dyn QueueTransport>, codec: AttributeCodec) -> Self {
        Self { transport, codec }
    }

    /// Build a consumer for `queue`
    ///
    /// # Errors
    ///
    /// Returns a validation error when `queue` is neither a valid queue name
    /// nor a queue URL.
    pub fn create(&self, queue: &str, routing_key: &str) -> Result<QueueConsumer, GatewayError> {
        let address = QueueAddress::parse(queue)?;
        debug!(queue = %address, routing_key = %routing_key, "Creating consumer");
        Ok(QueueConsumer::new(
            Arc::clone(&self.transport),
            address,
            self.codec,
        ))
    }
}

/// Source of named input channels
pub trait ChannelFactory: Send + Sync {
    /// Create a channel to consume from
    fn create_input_channel(
        &self,
        name: &str,
        routing_key: &str,
    ) -> Result<InputChannel, GatewayError>;

    /// Create a channel on the output side of a pipeline
    ///
    /// The backend model is a single queue, so this is the same kind of
    /// channel as [`ChannelFactory::create_input_channel`].
    fn create_output_channel(
        &self,
        name: &str,
        routing_key: &str,
    ) -> Result<InputChannel, GatewayError>;
}

/// [`ChannelFactory`] backed by a [`ConsumerFactory`]
#[derive(Clone)]
pub struct QueueChannelFactory {
    consumers: ConsumerFactory,
}

impl QueueChannelFactory {
    pub fn new(consumers: ConsumerFactory) -> Self {
        Self { consumers }
    }

    fn create_channel(&self, name: &str, routing_key: &str) -> Result<InputChannel, GatewayError> {
        let consumer = self.consumers.create(name, routing_key)?;
        Ok(InputChannel {
            name: name.to_string(),
            routing_key: routing_key.to_string(),
            consumer,
        })
    }
}

impl ChannelFactory for QueueChannelFactory {
    fn create_input_channel(
        &self,
        name: &str,
        routing_key: &str,
    ) -> Result<InputChannel, GatewayError> {
        self.create_channel(name, routing_key)
    }

    fn create_output_channel(
        &self,
        name: &str,
        routing_key: &str,
    ) -> Result<InputChannel, GatewayError> {
        self.create_channel(name, routing_key)
    }
}

/// A named consumer
#[derive(Debug)]
pub struct InputChannel {
    name: String,
    routing_key: String,
    consumer: QueueConsumer,
}

impl InputChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn consumer(&self) -> &QueueConsumer {
        &self.consumer
    }
}

#[async_trait]
impl MessageConsumer for InputChannel {
    async fn receive(&self, timeout_ms: u64) -> Message {
        self.consumer.receive(timeout_ms).await
    }

    async fn acknowledge(&self, message: &Message) -> Result<(), GatewayError> {
        self.consumer.acknowledge(message).await
    }

    async fn reject(&self, message: &Message, requeue: bool) -> Result<(), GatewayError> {
        self.consumer.reject(message, requeue).await
    }

    async fn requeue(&self, message: &Message) -> Result<(), GatewayError> {
        self.consumer.requeue(message).await
    }

    async fn purge(&self) -> Result<(), GatewayError> {
        self.consumer.purge().await
    }
}
