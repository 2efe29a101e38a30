//! Tests for the message producer.

use super::*;
use crate::codec::{BodyEncoding, CORRELATION_ID, TOPIC};
use crate::config::InMemoryConfig;
use crate::message::{MessageBody, MessageHeader, MessageId, MessageType};
use crate::providers::InMemoryTransport;
use crate::transport::{ReceiveRequest, TransportOperation, TransportSession};

fn queue() -> QueueAddress {
    QueueAddress::parse("brighter-test-queue").unwrap()
}

fn create_producer(transport: &InMemoryTransport, encoding: BodyEncoding) -> QueueProducer {
    QueueProducer::new(
        Arc::new(transport.clone()),
        queue(),
        AttributeCodec::new(encoding),
    )
}

fn create_test_message() -> Message {
    Message::new(
        MessageHeader::new(MessageId::new(), "test1", MessageType::Command)
            .with_correlation_id("corr-1"),
        MessageBody::new("test content"),
    )
}

#[tokio::test]
async fn test_send_enqueues_encoded_message() {
    let transport = InMemoryTransport::new(InMemoryConfig::default());
    let producer = create_producer(&transport, BodyEncoding::Raw);

    producer.send(&create_test_message()).await.unwrap();

    let session = transport.connect().await.unwrap();
    let delivery = session
        .receive(&queue(), ReceiveRequest::single(0))
        .await
        .unwrap()
        .expect("a delivery");
    assert_eq!(delivery.body, "test content");
    assert_eq!(delivery.attributes.get(TOPIC).unwrap().value, "test1");
    assert_eq!(delivery.attributes.get(CORRELATION_ID).unwrap().value, "corr-1");
}

#[tokio::test]
async fn test_send_wraps_body_in_notification_when_configured() {
    let transport = InMemoryTransport::default();
    let producer = create_producer(&transport, BodyEncoding::NotificationEnvelope);

    producer.send(&create_test_message()).await.unwrap();

    let session = transport.connect().await.unwrap();
    let delivery = session
        .receive(&queue(), ReceiveRequest::single(0))
        .await
        .unwrap()
        .unwrap();
    let wrapper: serde_json::Value = serde_json::from_str(&delivery.body).unwrap();
    assert_eq!(wrapper["Message"], "test content");
}

#[tokio::test]
async fn test_send_failure_is_returned_and_session_released() {
    let transport = InMemoryTransport::default();
    transport.fail_operation(TransportOperation::Send);
    let producer = create_producer(&transport, BodyEncoding::Raw);

    let result = producer.send(&create_test_message()).await;

    assert!(matches!(result, Err(GatewayError::ConnectionFailed { .. })));
    assert_eq!(transport.open_sessions(), 0);
    assert_eq!(transport.visible_count(&queue()), 0);
}

#[tokio::test]
async fn test_connect_failure_is_returned() {
    let transport = InMemoryTransport::default();
    transport.fail_connections();
    let producer = create_producer(&transport, BodyEncoding::Raw);

    let result = producer.send(&create_test_message()).await;

    assert!(result.is_err());
    assert_eq!(transport.call_count(TransportOperation::Send), 0);
}

#[tokio::test]
async fn test_send_does_not_carry_receipt_handle() {
    let transport = InMemoryTransport::default();
    let producer = create_producer(&transport, BodyEncoding::Raw);
    let mut message = create_test_message();
    message
        .header_mut()
        .bag_mut()
        .set_receipt_handle(crate::message::ReceiptHandle::new("old-receipt"));

    producer.send(&message).await.unwrap();

    let session = transport.connect().await.unwrap();
    let delivery = session
        .receive(&queue(), ReceiveRequest::single(0))
        .await
        .unwrap()
        .unwrap();
    assert!(delivery
        .attributes
        .values()
        .all(|attribute| attribute.value != "old-receipt"));
    assert_ne!(delivery.receipt_handle.as_str(), "old-receipt");
}
