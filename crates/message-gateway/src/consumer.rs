//! Message consumer bound to a single queue.
//!
//! Every operation opens one transport session and releases it before
//! returning. Receive never fails: whatever goes wrong is logged and reported
//! as [`Message::empty`]. Operations on a message that carries no receipt
//! handle are no-ops. All other failures are logged once here and returned.

use crate::codec::AttributeCodec;
use crate::error::GatewayError;
use crate::message::{Message, QueueAddress, ReceiptHandle};
use crate::transport::{QueueTransport, ReceiveRequest};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Receive-side operations of the gateway
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Wait up to `timeout_ms` (rounded down to whole seconds) for one message
    ///
    /// Returns [`Message::empty`] when nothing arrived or the backend could
    /// not be reached.
    async fn receive(&self, timeout_ms: u64) -> Message;

    /// Permanently remove a received message from the queue
    async fn acknowledge(&self, message: &Message) -> Result<(), GatewayError>;

    /// Give up on a message, either making it visible again or deleting it
    async fn reject(&self, message: &Message, requeue: bool) -> Result<(), GatewayError>;

    /// Delete a received message and enqueue a fresh copy of it
    async fn requeue(&self, message: &Message) -> Result<(), GatewayError>;

    /// Remove every message from the queue
    async fn purge(&self) -> Result<(), GatewayError>;
}

/// Consumer over a [`QueueTransport`]
pub struct QueueConsumer {
    transport: Arc<dyn QueueTransport>,
    queue: QueueAddress,
    codec: AttributeCodec,
}

impl QueueConsumer {
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

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), GatewayError> {
        let session = self.transport.connect().await?;
        session.delete(&self.queue, receipt).await
    }

    async fn release(&self, receipt: &ReceiptHandle) -> Result<(), GatewayError> {
        let session = self.transport.connect().await?;
        session.change_visibility(&self.queue, receipt, 0).await
    }

    /// Delete then re-send within one session
    ///
    /// The copy is checked against the backend's send limits first, so a copy
    /// that could never be sent leaves the original in place. A failed delete
    /// stops before the send.
    async fn delete_and_resend(
        &self,
        receipt: &ReceiptHandle,
        message: &Message,
    ) -> Result<String, GatewayError> {
        let mut copy = message.clone();
        copy.header_mut().bag_mut().take_receipt_handle();
        let envelope = self.codec.encode(&copy)?;

        let session = self.transport.connect().await?;
        session.validate(&self.queue, &envelope)?;
        session.delete(&self.queue, receipt).await?;
        session.send(&self.queue, &envelope).await
    }
}

impl fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue", &self.queue)
            .field("provider", &self.transport.provider_type())
            .field("codec", &self.codec)
            .finish()
    }
}

#[async_trait]
impl MessageConsumer for QueueConsumer {
    async fn receive(&self, timeout_ms: u64) -> Message {
        let request = ReceiveRequest::single(timeout_ms);
        debug!(
            queue = %self.queue,
            wait_time_seconds = request.wait_time_seconds,
            "Preparing to receive message"
        );

        let session = match self.transport.connect().await {
            Ok(session) => session,
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "Could not connect to receive message");
                return Message::empty();
            }
        };

        let delivery = match session.receive(&self.queue, request).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                debug!(queue = %self.queue, "No message available");
                return Message::empty();
            }
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "Failed to receive message");
                return Message::empty();
            }
        };
        drop(session);

        let message = self.codec.decode_delivery(&delivery);
        info!(
            queue = %self.queue,
            message_id = %message.id(),
            topic = %message.header().topic(),
            receipt_handle = %delivery.receipt_handle,
            receive_count = ?delivery.receive_count,
            "Received message"
        );
        message
    }

    async fn acknowledge(&self, message: &Message) -> Result<(), GatewayError> {
        let Some(receipt) = message.receipt_handle() else {
            debug!(message_id = %message.id(), "No receipt handle; nothing to acknowledge");
            return Ok(());
        };

        debug!(
            queue = %self.queue,
            message_id = %message.id(),
            receipt_handle = %receipt,
            "Acknowledging message"
        );
        match self.delete(receipt).await {
            Ok(()) => {
                info!(queue = %self.queue, message_id = %message.id(), "Deleted message");
                Ok(())
            }
            Err(e) => {
                error!(
                    queue = %self.queue,
                    message_id = %message.id(),
                    receipt_handle = %receipt,
                    error = %e,
                    "Failed to delete message"
                );
                Err(e)
            }
        }
    }

    async fn reject(&self, message: &Message, requeue: bool) -> Result<(), GatewayError> {
        let Some(receipt) = message.receipt_handle() else {
            debug!(message_id = %message.id(), "No receipt handle; nothing to reject");
            return Ok(());
        };

        info!(
            queue = %self.queue,
            message_id = %message.id(),
            requeue,
            "Rejecting message"
        );
        let result = if requeue {
            self.release(receipt).await
        } else {
            self.delete(receipt).await
        };

        if let Err(e) = &result {
            error!(
                queue = %self.queue,
                message_id = %message.id(),
                receipt_handle = %receipt,
                requeue,
                error = %e,
                "Failed to reject message"
            );
        }
        result
    }

    async fn requeue(&self, message: &Message) -> Result<(), GatewayError> {
        let Some(receipt) = message.receipt_handle() else {
            debug!(message_id = %message.id(), "No receipt handle; nothing to requeue");
            return Ok(());
        };

        debug!(
            queue = %self.queue,
            message_id = %message.id(),
            receipt_handle = %receipt,
            "Requeueing message"
        );
        match self.delete_and_resend(receipt, message).await {
            Ok(native_id) => {
                info!(
                    queue = %self.queue,
                    message_id = %message.id(),
                    native_id = %native_id,
                    "Requeued message"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    queue = %self.queue,
                    message_id = %message.id(),
                    receipt_handle = %receipt,
                    error = %e,
                    "Failed to requeue message"
                );
                Err(e)
            }
        }
    }

    async fn purge(&self) -> Result<(), GatewayError> {
        debug!(queue = %self.queue, "Purging queue");

        let result = match self.transport.connect().await {
            Ok(session) => session.purge(&self.queue).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => info!(queue = %self.queue, "Purged queue"),
            Err(e) => error!(queue = %self.queue, error = %e, "Failed to purge queue"),
        }
        result
    }
}
