//! Message producer bound to a single queue.

use crate::codec::AttributeCodec;
use crate::error::GatewayError;
use crate::message::{Message, QueueAddress};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Send-side operations of the gateway
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Enqueue a message, resolving once the backend has accepted it
    ///
    /// There is no retry. Dropping the returned future before it completes
    /// abandons the send.
    async fn send(&self, message: &Message) -> Result<(), GatewayError>;
}

/// Producer over a [`QueueTransport`]
pub struct QueueProducer {
    transport: Arc<dyn QueueTransport>,
    queue: QueueAddress,
    codec: AttributeCodec,
}

impl QueueProducer {
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

    async fn publish(&self, message: &Message) -> Result<String, GatewayError> {
        let envelope = self.codec.encode(message)?;
        let session = self.transport.connect().await?;
        session.send(&self.queue, &envelope).await
    }
}

impl fmt::Debug for QueueProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProducer")
            .field("queue", &self.queue)
            .field("provider", &self.transport.provider_type())
            .field("codec", &self.codec)
            .finish()
    }
}

#[async_trait]
impl MessageProducer for QueueProducer {
    async fn send(&self, message: &Message) -> Result<(), GatewayError> {
        debug!(
            queue = %self.queue,
            message_id = %message.id(),
            topic = %message.header().topic(),
            "Preparing to send message"
        );

        match self.publish(message).await {
            Ok(native_id) => {
                info!(
                    queue = %self.queue,
                    message_id = %message.id(),
                    native_id = %native_id,
                    "Sent message"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    queue = %self.queue,
                    message_id = %message.id(),
                    error = %e,
                    "Failed to send message"
                );
                Err(e)
            }
        }
    }
}
