//! Attribute codec: maps a [`Message`] to and from the transport envelope.
//!
//! Header fields travel as string-valued transport attributes; the body
//! travels in the payload slot, either verbatim or wrapped in a one-level JSON
//! notification envelope depending on the configured [`BodyEncoding`].
//!
//! Decoding never fails. Missing or malformed attributes degrade to defaults:
//!
//! | Attribute      | Default                               |
//! |----------------|---------------------------------------|
//! | `Topic`        | empty string                          |
//! | `MessageType`  | [`MessageType::Event`]                |
//! | `HandledCount` | `0`                                   |
//! | `TimeStamp`    | current time                          |
//! | `MessageId`    | backend message id, else a fresh UUID |

use crate::error::SerializationError;
use crate::message::{
    Message, MessageBody, MessageHeader, MessageId, MessageType, ReceiptHandle, Timestamp,
};
use crate::transport::Delivery;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

// ============================================================================
// Attribute Names
// ============================================================================

pub const MESSAGE_TYPE: &str = "MessageType";
pub const MESSAGE_ID: &str = "MessageId";
pub const TOPIC: &str = "Topic";
pub const HANDLED_COUNT: &str = "HandledCount";
pub const TIMESTAMP: &str = "TimeStamp";
pub const CORRELATION_ID: &str = "CorrelationId";

/// Bag key under which the receipt handle of a delivery is reported
pub const RECEIPT_HANDLE: &str = "ReceiptHandle";

const HEADER_ATTRIBUTES: [&str; 6] = [
    MESSAGE_TYPE,
    MESSAGE_ID,
    TOPIC,
    HANDLED_COUNT,
    TIMESTAMP,
    CORRELATION_ID,
];

/// Check if a name is owned by the envelope and unavailable to bag extensions
pub fn is_reserved_attribute(name: &str) -> bool {
    name == RECEIPT_HANDLE || HEADER_ATTRIBUTES.contains(&name)
}

// ============================================================================
// Envelope Types
// ============================================================================

/// Data type tag carried next to each attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeDataType {
    String,
    Number,
}

impl AttributeDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Number => "Number",
        }
    }

    /// Interpret a backend data type label; custom suffixes such as
    /// `Number.int` keep their base type
    pub fn from_label(label: &str) -> Self {
        if label.starts_with("Number") {
            Self::Number
        } else {
            Self::String
        }
    }
}

impl fmt::Display for AttributeDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single string-encoded transport attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub data_type: AttributeDataType,
    pub value: String,
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: AttributeDataType::String,
            value: value.into(),
        }
    }

    pub fn number(value: impl ToString) -> Self {
        Self {
            data_type: AttributeDataType::Number,
            value: value.to_string(),
        }
    }
}

/// Transport attributes keyed by name
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Transport-level representation of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub attributes: Attributes,
    pub body: String,
}

/// How the message body is laid out in the transport payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// The payload is the message body verbatim
    #[default]
    Raw,
    /// The payload is a JSON notification whose `Message` field holds the body
    NotificationEnvelope,
}

/// One-level notification wrapper as published by fan-out topics
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NotificationEnvelope {
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic_arn: Option<String>,
    message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    message_attributes: BTreeMap<String, NotificationAttribute>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NotificationAttribute {
    #[serde(rename = "Type")]
    data_type: String,
    #[serde(rename = "Value")]
    value: String,
}

// ============================================================================
// Codec
// ============================================================================

/// Bidirectional mapping between [`Message`] and [`Envelope`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeCodec {
    body_encoding: BodyEncoding,
}

impl AttributeCodec {
    pub fn new(body_encoding: BodyEncoding) -> Self {
        Self { body_encoding }
    }

    pub fn body_encoding(&self) -> BodyEncoding {
        self.body_encoding
    }

    /// Encode a message into transport attributes and payload
    ///
    /// The receipt handle never leaves the process; every bag extension is
    /// copied verbatim as a string attribute. Attributes with an empty value
    /// are left out, since backends reject them; a missing `Topic` decodes
    /// back to an empty topic.
    pub fn encode(&self, message: &Message) -> Result<Envelope, SerializationError> {
        let header = message.header();

        let mut attributes = Attributes::new();
        attributes.insert(
            HANDLED_COUNT.to_string(),
            AttributeValue::number(header.handled_count()),
        );
        if !header.topic().is_empty() {
            attributes.insert(TOPIC.to_string(), AttributeValue::string(header.topic()));
        }
        attributes.insert(
            MESSAGE_ID.to_string(),
            AttributeValue::string(header.id().to_string()),
        );
        attributes.insert(
            MESSAGE_TYPE.to_string(),
            AttributeValue::string(header.message_type().as_str()),
        );
        attributes.insert(
            TIMESTAMP.to_string(),
            AttributeValue::string(header.timestamp().unix_seconds().to_string()),
        );
        if let Some(correlation_id) = header.correlation_id().filter(|id| !id.is_empty()) {
            attributes.insert(
                CORRELATION_ID.to_string(),
                AttributeValue::string(correlation_id),
            );
        }

        for (key, value) in header.bag().extensions() {
            if !value.is_empty() {
                attributes.insert(key.clone(), AttributeValue::string(value.clone()));
            }
        }

        let body = match self.body_encoding {
            BodyEncoding::Raw => message.body().as_str().to_string(),
            BodyEncoding::NotificationEnvelope => serde_json::to_string(&NotificationEnvelope {
                kind: Some("Notification".to_string()),
                message_id: Some(header.id().to_string()),
                topic_arn: None,
                message: message.body().as_str().to_string(),
                message_attributes: BTreeMap::new(),
            })?,
        };

        Ok(Envelope { attributes, body })
    }

    /// Rebuild a message from transport attributes and payload
    ///
    /// The receipt handle, when supplied, is attached to the header bag.
    pub fn decode(
        &self,
        attributes: &Attributes,
        body: &str,
        receipt_handle: Option<ReceiptHandle>,
    ) -> Message {
        self.decode_with_fallback_id(attributes, body, receipt_handle, None)
    }

    /// Rebuild a message from a backend delivery
    ///
    /// The backend's own message id stands in for a missing `MessageId`
    /// attribute when it is a UUID.
    pub fn decode_delivery(&self, delivery: &Delivery) -> Message {
        self.decode_with_fallback_id(
            &delivery.attributes,
            &delivery.body,
            Some(delivery.receipt_handle.clone()),
            delivery.native_id.as_deref(),
        )
    }

    fn decode_with_fallback_id(
        &self,
        attributes: &Attributes,
        body: &str,
        receipt_handle: Option<ReceiptHandle>,
        fallback_id: Option<&str>,
    ) -> Message {
        let (payload, attributes) = match self.body_encoding {
            BodyEncoding::Raw => (body.to_string(), Cow::Borrowed(attributes)),
            BodyEncoding::NotificationEnvelope => unwrap_notification(body, attributes),
        };

        let id = parse_attribute::<MessageId>(&attributes, MESSAGE_ID)
            .or_else(|| fallback_id.and_then(|id| id.parse().ok()))
            .unwrap_or_else(|| {
                debug!("Delivery carries no usable message id; assigning a new one");
                MessageId::new()
            });
        let topic = attributes
            .get(TOPIC)
            .map(|attribute| attribute.value.clone())
            .unwrap_or_default();
        let message_type =
            parse_attribute::<MessageType>(&attributes, MESSAGE_TYPE).unwrap_or(MessageType::Event);
        let handled_count = parse_attribute::<u32>(&attributes, HANDLED_COUNT).unwrap_or(0);
        let timestamp = parse_attribute::<i64>(&attributes, TIMESTAMP)
            .and_then(Timestamp::from_unix_seconds)
            .unwrap_or_else(Timestamp::now);

        let mut header = MessageHeader::new(id, topic, message_type)
            .with_timestamp(timestamp)
            .with_handled_count(handled_count);
        if let Some(correlation_id) = attributes
            .get(CORRELATION_ID)
            .map(|attribute| attribute.value.as_str())
            .filter(|value| !value.is_empty())
        {
            header = header.with_correlation_id(correlation_id);
        }

        let bag = header.bag_mut();
        for (name, attribute) in attributes.iter() {
            if !is_reserved_attribute(name) {
                bag.insert_extension(name.clone(), attribute.value.clone());
            }
        }
        if let Some(receipt_handle) = receipt_handle {
            bag.set_receipt_handle(receipt_handle);
        }

        Message::new(header, MessageBody::new(payload))
    }
}

/// Parse an attribute, treating a malformed value like an absent one
fn parse_attribute<T: FromStr>(attributes: &Attributes, name: &str) -> Option<T> {
    let attribute = attributes.get(name)?;
    match attribute.value.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                attribute = name,
                value = %attribute.value,
                "Malformed envelope attribute; using default"
            );
            None
        }
    }
}

/// Strip one notification layer, merging its attributes under the transport's
fn unwrap_notification<'a>(
    body: &str,
    attributes: &'a Attributes,
) -> (String, Cow<'a, Attributes>) {
    let notification = match serde_json::from_str::<NotificationEnvelope>(body) {
        Ok(notification) => notification,
        Err(e) => {
            debug!(error = %e, "Body is not a notification envelope; using it verbatim");
            return (body.to_string(), Cow::Borrowed(attributes));
        }
    };

    if notification.message_attributes.is_empty() {
        return (notification.message, Cow::Borrowed(attributes));
    }

    let mut merged = attributes.clone();
    for (name, attribute) in notification.message_attributes {
        merged.entry(name).or_insert(AttributeValue {
            data_type: AttributeDataType::from_label(&attribute.data_type),
            value: attribute.value,
        });
    }

    (notification.message, Cow::Owned(merged))
}
