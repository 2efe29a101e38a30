//! Tests for channel construction.

use super::*;
use crate::error::ValidationError;
use crate::message::{MessageBody, MessageHeader, MessageId, MessageType};
use crate::producer::{MessageProducer, QueueProducer};
use crate::providers::InMemoryTransport;

fn create_factory(transport: &InMemoryTransport) -> QueueChannelFactory {
    QueueChannelFactory::new(ConsumerFactory::new(
        Arc::new(transport.clone()),
        AttributeCodec::default(),
    ))
}

async fn send_one(transport: &InMemoryTransport, queue: &str) -> Message {
    let message = Message::new(
        MessageHeader::new(MessageId::new(), "test1", MessageType::Event),
        MessageBody::new("channel content"),
    );
    QueueProducer::new(
        Arc::new(transport.clone()),
        QueueAddress::parse(queue).unwrap(),
        AttributeCodec::default(),
    )
    .send(&message)
    .await
    .unwrap();
    message
}

#[test]
fn test_input_channel_carries_name_and_routing_key() {
    let transport = InMemoryTransport::default();
    let factory = create_factory(&transport);

    let channel = factory.create_input_channel("orders", "orders.created").unwrap();

    assert_eq!(channel.name(), "orders");
    assert_eq!(channel.routing_key(), "orders.created");
    assert_eq!(channel.consumer().queue().as_str(), "orders");
}

#[test]
fn test_invalid_channel_name_is_rejected() {
    let transport = InMemoryTransport::default();
    let factory = create_factory(&transport);

    let result = factory.create_input_channel("bad queue name!", "key");

    assert!(matches!(
        result,
        Err(GatewayError::ValidationError(ValidationError::InvalidFormat { .. }))
    ));
    assert!(factory.create_output_channel("", "key").is_err());
}

#[test]
fn test_consumer_factory_accepts_queue_url() {
    let transport = InMemoryTransport::default();
    let factory = ConsumerFactory::new(Arc::new(transport), AttributeCodec::default());

    let consumer = factory
        .create("https://sqs.us-east-1.amazonaws.com/123456789012/orders", "")
        .unwrap();

    assert!(matches!(consumer.queue(), QueueAddress::Url(_)));
}

#[tokio::test]
async fn test_input_channel_delegates_to_consumer() {
    let transport = InMemoryTransport::default();
    let factory = create_factory(&transport);
    let sent = send_one(&transport, "orders").await;
    let channel = factory.create_input_channel("orders", "ignored").unwrap();

    let received = channel.receive(0).await;
    assert_eq!(received.id(), sent.id());
    channel.acknowledge(&received).await.unwrap();

    assert!(channel.receive(0).await.is_empty());
    assert_eq!(transport.in_flight_count(&QueueAddress::parse("orders").unwrap()), 0);
}

#[tokio::test]
async fn test_channels_are_independent_but_share_the_queue() {
    let transport = InMemoryTransport::default();
    let factory = create_factory(&transport);
    let sent = send_one(&transport, "orders").await;
    let input = factory.create_input_channel("orders", "a").unwrap();
    let output = factory.create_output_channel("orders", "b").unwrap();

    let received = output.receive(0).await;
    assert_eq!(received.id(), sent.id());
    assert!(input.receive(0).await.is_empty());

    input.reject(&received, true).await.unwrap();
    assert_eq!(input.receive(0).await.id(), sent.id());
}

#[tokio::test]
async fn test_routing_key_does_not_filter_messages() {
    let transport = InMemoryTransport::default();
    let factory = create_factory(&transport);
    send_one(&transport, "orders").await;
    let channel = factory
        .create_input_channel("orders", "does.not.match.topic")
        .unwrap();

    assert!(!channel.receive(0).await.is_empty());
    channel.purge().await.unwrap();
    assert_eq!(transport.visible_count(&QueueAddress::parse("orders").unwrap()), 0);
}
