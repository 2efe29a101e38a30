//! Common test utilities for message-gateway integration tests
//!
//! This module provides:
//! - Builders for gateways over the in-memory transport
//! - A stateful SQS Query API responder served through wiremock
//! - Shared message builders

#![allow(dead_code)]

use message_gateway::{
    AttributeCodec, BodyEncoding, Gateway, GatewayConfig, InMemoryConfig, InMemoryTransport,
    Message, MessageBody, MessageHeader, MessageId, MessageType, ProviderKind, QueueAddress,
    SqsConfig,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TEST_QUEUE: &str = "brighter-test-queue";

// ============================================================================
// In-memory gateways
// ============================================================================

/// Gateway over a fresh in-memory transport, plus a handle to its test hooks
pub fn memory_gateway(visibility_timeout_ms: u64) -> (InMemoryTransport, Gateway) {
    memory_gateway_with_encoding(visibility_timeout_ms, BodyEncoding::Raw)
}

pub fn memory_gateway_with_encoding(
    visibility_timeout_ms: u64,
    encoding: BodyEncoding,
) -> (InMemoryTransport, Gateway) {
    let transport = InMemoryTransport::new(InMemoryConfig {
        visibility_timeout_ms,
    });
    let gateway = Gateway::new(
        Arc::new(transport.clone()),
        test_queue(),
        AttributeCodec::new(encoding),
    );
    (transport, gateway)
}

pub fn test_queue() -> QueueAddress {
    QueueAddress::parse(TEST_QUEUE).expect("valid queue name")
}

pub fn create_message(topic: &str, message_type: MessageType, body: &str) -> Message {
    Message::new(
        MessageHeader::new(MessageId::new(), topic, message_type),
        MessageBody::new(body),
    )
}

// ============================================================================
// Mock SQS endpoint
// ============================================================================

#[derive(Debug, Clone)]
struct FakeMessage {
    message_id: String,
    body: String,
    attributes: BTreeMap<String, (String, String)>,
    receive_count: u32,
    receipt_handle: Option<String>,
}

#[derive(Debug, Default)]
struct FakeQueueState {
    messages: Vec<FakeMessage>,
    actions: Vec<String>,
}

/// Single-queue SQS emulation answering Query API form posts
///
/// Received messages stay hidden until deleted or made visible again; there
/// is no visibility clock.
#[derive(Clone)]
pub struct FakeSqs {
    queue_url: String,
    state: Arc<Mutex<FakeQueueState>>,
}

impl FakeSqs {
    /// Start a mock server answering for a single queue
    pub async fn start() -> (MockServer, FakeSqs) {
        let server = MockServer::start().await;
        let fake = FakeSqs {
            queue_url: format!("{}/123456789012/{}", server.uri(), TEST_QUEUE),
            state: Arc::new(Mutex::new(FakeQueueState::default())),
        };

        Mock::given(method("POST"))
            .respond_with(fake.clone())
            .mount(&server)
            .await;

        (server, fake)
    }

    /// Gateway configuration pointing at `server`
    pub fn config(server: &MockServer) -> GatewayConfig {
        GatewayConfig {
            provider: ProviderKind::AwsSqs,
            queue: TEST_QUEUE.to_string(),
            sqs: SqsConfig {
                endpoint: Some(server.uri()),
                access_key_id: Some("AKIDEXAMPLE".to_string()),
                secret_access_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
                ..SqsConfig::default()
            },
            ..GatewayConfig::default()
        }
    }

    /// Actions received so far, in order
    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    /// Messages not yet deleted, visible or not
    pub fn stored_count(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    /// Enqueue a message as another producer would, bypassing the gateway
    pub fn inject(&self, body: &str, attributes: &[(&str, &str)]) {
        let message = FakeMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            body: body.to_string(),
            attributes: attributes
                .iter()
                .map(|(name, value)| {
                    (name.to_string(), ("String".to_string(), value.to_string()))
                })
                .collect(),
            receive_count: 0,
            receipt_handle: None,
        };
        self.state.lock().unwrap().messages.push(message);
    }

    fn handle(&self, params: &HashMap<String, String>) -> ResponseTemplate {
        let action = params.get("Action").cloned().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.actions.push(action.clone());

        match action.as_str() {
            "GetQueueUrl" => {
                if params.get("QueueName").map(String::as_str) != Some(TEST_QUEUE) {
                    return error_response("AWS.SimpleQueueService.NonExistentQueue");
                }
                xml_response(format!(
                    "<GetQueueUrlResponse><GetQueueUrlResult><QueueUrl>{}</QueueUrl></GetQueueUrlResult></GetQueueUrlResponse>",
                    self.queue_url
                ))
            }
            "SendMessage" => {
                let attributes = message_attributes(params);
                if attributes.len() > 10 {
                    return error_response("TooManyMessageAttributes");
                }
                if attributes.values().any(|(_, value)| value.is_empty()) {
                    return error_response("InvalidParameterValue");
                }
                let message = FakeMessage {
                    message_id: uuid::Uuid::new_v4().to_string(),
                    body: params.get("MessageBody").cloned().unwrap_or_default(),
                    attributes,
                    receive_count: 0,
                    receipt_handle: None,
                };
                let response = format!(
                    "<SendMessageResponse><SendMessageResult><MessageId>{}</MessageId></SendMessageResult></SendMessageResponse>",
                    message.message_id
                );
                state.messages.push(message);
                xml_response(response)
            }
            "ReceiveMessage" => {
                let visible = state
                    .messages
                    .iter_mut()
                    .find(|message| message.receipt_handle.is_none());
                let Some(message) = visible else {
                    return xml_response(
                        "<ReceiveMessageResponse><ReceiveMessageResult></ReceiveMessageResult></ReceiveMessageResponse>"
                            .to_string(),
                    );
                };

                message.receive_count += 1;
                let receipt = uuid::Uuid::new_v4().to_string();
                message.receipt_handle = Some(receipt.clone());
                xml_response(receive_response(message, &receipt))
            }
            "DeleteMessage" => {
                let receipt = params.get("ReceiptHandle").cloned().unwrap_or_default();
                let before = state.messages.len();
                state
                    .messages
                    .retain(|message| message.receipt_handle.as_deref() != Some(receipt.as_str()));
                if state.messages.len() == before {
                    return error_response("ReceiptHandleIsInvalid");
                }
                xml_response("<DeleteMessageResponse></DeleteMessageResponse>".to_string())
            }
            "ChangeMessageVisibility" => {
                let receipt = params.get("ReceiptHandle").cloned().unwrap_or_default();
                let Some(message) = state
                    .messages
                    .iter_mut()
                    .find(|message| message.receipt_handle.as_deref() == Some(receipt.as_str()))
                else {
                    return error_response("ReceiptHandleIsInvalid");
                };
                if params.get("VisibilityTimeout").map(String::as_str) == Some("0") {
                    message.receipt_handle = None;
                }
                xml_response(
                    "<ChangeMessageVisibilityResponse></ChangeMessageVisibilityResponse>".to_string(),
                )
            }
            "PurgeQueue" => {
                state.messages.clear();
                xml_response("<PurgeQueueResponse></PurgeQueueResponse>".to_string())
            }
            _ => error_response("InvalidAction"),
        }
    }
}

impl Respond for FakeSqs {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let params: HashMap<String, String> = url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect();
        self.handle(&params)
    }
}

fn message_attributes(params: &HashMap<String, String>) -> BTreeMap<String, (String, String)> {
    let mut attributes = BTreeMap::new();
    for index in 1.. {
        let prefix = format!("MessageAttribute.{}", index);
        let Some(name) = params.get(&format!("{}.Name", prefix)) else {
            break;
        };
        let value = params
            .get(&format!("{}.Value.StringValue", prefix))
            .cloned()
            .unwrap_or_default();
        let data_type = params
            .get(&format!("{}.Value.DataType", prefix))
            .cloned()
            .unwrap_or_else(|| "String".to_string());
        attributes.insert(name.clone(), (data_type, value));
    }
    attributes
}

fn receive_response(message: &FakeMessage, receipt: &str) -> String {
    let attributes: String = message
        .attributes
        .iter()
        .map(|(name, (data_type, value))| {
            format!(
                "<MessageAttribute><Name>{}</Name><Value><StringValue>{}</StringValue><DataType>{}</DataType></Value></MessageAttribute>",
                escape(name),
                escape(value),
                escape(data_type)
            )
        })
        .collect();

    format!(
        "<ReceiveMessageResponse><ReceiveMessageResult><Message>\
         <MessageId>{}</MessageId>\
         <ReceiptHandle>{}</ReceiptHandle>\
         <Body>{}</Body>\
         <Attribute><Name>ApproximateReceiveCount</Name><Value>{}</Value></Attribute>\
         {}\
         </Message></ReceiveMessageResult></ReceiveMessageResponse>",
        message.message_id,
        receipt,
        escape(&message.body),
        message.receive_count,
        attributes
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/xml")
}

fn error_response(code: &str) -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_raw(
        format!(
            "<ErrorResponse><Error><Type>Sender</Type><Code>{}</Code><Message>{} reported by mock</Message></Error><RequestId>00000000-0000-0000-0000-000000000000</RequestId></ErrorResponse>",
            code, code
        ),
        "text/xml",
    )
}
