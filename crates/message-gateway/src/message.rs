//! Message envelope types and core domain identifiers.

use crate::codec::is_reserved_attribute;
use crate::error::ValidationError;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Maximum queue name length accepted by SQS-compatible backends
const MAX_QUEUE_NAME_LENGTH: usize = 80;

/// Suffix that marks a FIFO queue
const FIFO_SUFFIX: &str = ".fifo";

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", MAX_QUEUE_NAME_LENGTH),
            });
        }

        let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(&name);
        if base.is_empty()
            || !base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and a '.fifo' suffix allowed"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Check if the name designates a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Identity of the queue a consumer or producer is bound to
///
/// Backends accept either a bare queue name, which the transport resolves, or
/// the full queue endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueAddress {
    Name(QueueName),
    Url(Url),
}

impl QueueAddress {
    /// Parse a queue name or an `http(s)` queue URL
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let value = value.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            let url = Url::parse(value).map_err(|e| ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: e.to_string(),
            })?;
            return Ok(Self::Url(url));
        }

        Ok(Self::Name(QueueName::new(value.to_string())?))
    }

    /// Check if the address designates a FIFO queue
    pub fn is_fifo(&self) -> bool {
        match self {
            Self::Name(name) => name.is_fifo(),
            Self::Url(url) => url.path().trim_end_matches('/').ends_with(FIFO_SUFFIX),
        }
    }

    /// Get the address as it was supplied
    pub fn as_str(&self) -> &str {
        match self {
            Self::Name(name) => name.as_str(),
            Self::Url(url) => url.as_str(),
        }
    }
}

impl fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<QueueName> for QueueAddress {
    fn from(name: QueueName) -> Self {
        Self::Name(name)
    }
}

/// Globally unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero identifier carried by the empty message
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ValidationError::InvalidFormat {
                field: "message_id".to_string(),
                message: e.to_string(),
            })
    }
}

/// Kind of request a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Command,
    Event,
    Document,
    None,
}

impl MessageType {
    /// Wire name of the message type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "Command",
            Self::Event => "Event",
            Self::Document => "Document",
            Self::None => "None",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ValidationError;

    /// Accepts the wire names in any case as well as the `MT_` prefixed
    /// spellings older publishers put on the wire.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let name = normalized.strip_prefix("mt_").unwrap_or(&normalized);
        match name {
            "command" => Ok(Self::Command),
            "event" => Ok(Self::Event),
            "document" => Ok(Self::Document),
            "none" => Ok(Self::None),
            _ => Err(ValidationError::InvalidFormat {
                field: "message_type".to_string(),
                message: format!("unknown message type '{}'", s),
            }),
        }
    }
}

/// UTC timestamp held at whole-second precision
///
/// The wire carries seconds since the Unix epoch, so sub-second precision is
/// dropped at construction to keep encode/decode lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(0))
    }

    /// Create timestamp from seconds since the Unix epoch
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp(seconds, 0).map(Self)
    }

    /// Seconds since the Unix epoch
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Header Bag
// ============================================================================

/// Opaque token issued by the backend for one delivery of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport and operational metadata attached to a header
///
/// The receipt handle is a typed field because every consumer operation
/// depends on it; everything else is free-form extension metadata that is
/// carried as additional transport attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBag {
    receipt_handle: Option<ReceiptHandle>,
    extensions: BTreeMap<String, String>,
}

impl HeaderBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receipt handle of the delivery this message came from, if any
    pub fn receipt_handle(&self) -> Option<&ReceiptHandle> {
        self.receipt_handle.as_ref()
    }

    pub fn set_receipt_handle(&mut self, receipt_handle: ReceiptHandle) {
        self.receipt_handle = Some(receipt_handle);
    }

    pub fn take_receipt_handle(&mut self) -> Option<ReceiptHandle> {
        self.receipt_handle.take()
    }

    /// Add an extension entry, returning the previous value for the key
    ///
    /// Envelope attribute names cannot be used as keys, and values must not
    /// be empty.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::Required {
                field: "bag_key".to_string(),
            });
        }
        if is_reserved_attribute(&key) {
            return Err(ValidationError::ReservedKey { key });
        }
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: format!("bag value for '{}'", key),
            });
        }

        Ok(self.extensions.insert(key, value))
    }

    /// Insert an entry whose key the codec has already checked
    pub(crate) fn insert_extension(&mut self, key: String, value: String) {
        self.extensions.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.extensions.remove(key)
    }

    pub fn extensions(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Header of a message: identity, routing and handling metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    id: MessageId,
    topic: String,
    message_type: MessageType,
    timestamp: Timestamp,
    correlation_id: Option<String>,
    handled_count: u32,
    bag: HeaderBag,
}

impl MessageHeader {
    /// Create a header stamped with the current time
    pub fn new(id: MessageId, topic: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id,
            topic: topic.into(),
            message_type,
            timestamp: Timestamp::now(),
            correlation_id: None,
            handled_count: 0,
            bag: HeaderBag::new(),
        }
    }

    /// Header of the empty message
    pub fn empty() -> Self {
        Self::new(MessageId::nil(), "", MessageType::None)
    }

    /// Set the creation timestamp
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add correlation ID for request/reply tracking
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the handled count carried over from a previous delivery
    pub fn with_handled_count(mut self, handled_count: u32) -> Self {
        self.handled_count = handled_count;
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn handled_count(&self) -> u32 {
        self.handled_count
    }

    /// Record one more hand-off to an application handler
    pub fn increment_handled_count(&mut self) {
        self.handled_count = self.handled_count.saturating_add(1);
    }

    pub fn bag(&self) -> &HeaderBag {
        &self.bag
    }

    pub fn bag_mut(&mut self) -> &mut HeaderBag {
        &mut self.bag
    }
}

/// Payload of a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageBody {
    value: String,
}

impl MessageBody {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.value.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl From<&str> for MessageBody {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageBody {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A message: exactly one header and one body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    header: MessageHeader,
    body: MessageBody,
}

impl Message {
    pub fn new(header: MessageHeader, body: MessageBody) -> Self {
        Self { header, body }
    }

    /// The sentinel returned when no message could be received
    pub fn empty() -> Self {
        Self::new(MessageHeader::empty(), MessageBody::empty())
    }

    /// Check if this is the sentinel returned by an unsuccessful receive
    pub fn is_empty(&self) -> bool {
        self.header.message_type == MessageType::None && self.header.id.is_nil()
    }

    pub fn id(&self) -> MessageId {
        self.header.id
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Receipt handle of the delivery this message came from, if any
    pub fn receipt_handle(&self) -> Option<&ReceiptHandle> {
        self.header.bag.receipt_handle()
    }

    pub fn into_parts(self) -> (MessageHeader, MessageBody) {
        (self.header, self.body)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
