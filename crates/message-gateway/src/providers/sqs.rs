//! Amazon SQS transport over the Query API.
//!
//! Requests are plain HTTP POSTs with a form-encoded body, signed with AWS
//! Signature Version 4. Responses are XML. Talking HTTP directly keeps the
//! transport testable against a mock server and usable with SQS-compatible
//! services such as LocalStack or ElasticMQ.
//!
//! ## Authentication
//!
//! Access keys come from [`SqsConfig`] or, when absent there, from the
//! `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` environment variables.
//! A transport without credentials can be built but refuses to connect.
//!
//! ## Queue addressing
//!
//! Queue URLs are used as given. Queue names are resolved once through
//! `GetQueueUrl` and cached for the lifetime of the transport.
//!
//! ## FIFO queues
//!
//! Sends to a `.fifo` queue carry a `MessageGroupId` (the message topic, or
//! `default` when the topic is empty) and a `MessageDeduplicationId` (the
//! message id).

use crate::codec::{AttributeDataType, AttributeValue, Attributes, Envelope, MESSAGE_ID, TOPIC};
use crate::config::SqsConfig;
use crate::error::{ConfigurationError, GatewayError, SerializationError, ValidationError};
use crate::message::{QueueAddress, QueueName, ReceiptHandle};
use crate::transport::{
    Delivery, ProviderType, QueueTransport, ReceiveRequest, TransportOperation, TransportSession,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// Most message attributes SQS accepts on one message
pub const MAX_MESSAGE_ATTRIBUTES: usize = 10;

const DEFAULT_MESSAGE_GROUP: &str = "default";

// ============================================================================
// Error Types
// ============================================================================

/// SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum SqsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("SQS service error {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Too many message attributes: {count} (max: {max})")]
    TooManyAttributes { count: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Response is missing element: {0}")]
    MissingElement(String),
}

impl SqsError {
    /// Check if error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::ServiceError { .. })
    }

    /// Map SQS error to GatewayError
    pub fn to_gateway_error(self) -> GatewayError {
        match self {
            Self::Authentication(message) => GatewayError::AuthenticationFailed { message },
            Self::NetworkError(message) => GatewayError::ConnectionFailed { message },
            Self::ServiceError { code, message } => GatewayError::ProviderError {
                provider: ProviderType::AwsSqs.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue) => GatewayError::QueueNotFound { queue },
            Self::InvalidReceipt(receipt) => GatewayError::ReceiptInvalid { receipt },
            Self::MessageTooLarge { size, max_size } => {
                GatewayError::MessageTooLarge { size, max_size }
            }
            Self::TooManyAttributes { count, max } => {
                GatewayError::ValidationError(ValidationError::OutOfRange {
                    field: "message_attributes".to_string(),
                    message: format!("{} attributes exceeds the limit of {}", count, max),
                })
            }
            Self::ConfigurationError(message) => {
                GatewayError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::MalformedResponse(message) => {
                GatewayError::SerializationError(SerializationError::XmlError { message })
            }
            Self::MissingElement(element) => {
                GatewayError::SerializationError(SerializationError::MissingElement { element })
            }
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer
///
/// 1. Canonical request (method, URI, query, headers, payload hash)
/// 2. String to sign (algorithm, timestamp, scope, request hash)
/// 3. Signing key from a four-step HMAC chain
/// 4. Signature and `Authorization` header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a request, returning the headers to attach
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &BTreeMap<String, String>,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> HashMap<String, String> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let mut canonical_query_string = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>();
        canonical_query_string.sort();
        let canonical_query_string = canonical_query_string.join("&");

        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), authorization_header);
        headers.insert("x-amz-date".to_string(), amz_date);
        headers.insert("host".to_string(), host.to_string());

        headers
    }

    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = self.hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = self.hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = self.hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = self.hmac_sha256(&k_service, b"aws4_request");
        let signature = self.hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

// ============================================================================
// SQS Transport
// ============================================================================

/// Shared state behind the transport and its sessions
struct SqsClient {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: Url,
    host: String,
    queue_url_cache: RwLock<HashMap<QueueName, String>>,
}

/// Transport backed by Amazon SQS or a wire-compatible service
///
/// Cheap to share behind an `Arc`; sessions borrow the same HTTP client and
/// queue URL cache.
pub struct SqsTransport {
    client: Arc<SqsClient>,
    config: SqsConfig,
}

impl SqsTransport {
    /// Create a new SQS transport
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the region or endpoint is invalid,
    /// or a connection error when the HTTP client cannot be built.
    pub fn new(config: SqsConfig) -> Result<Self, GatewayError> {
        Self::build(config).map_err(SqsError::to_gateway_error)
    }

    fn build(config: SqsConfig) -> Result<Self, SqsError> {
        if config.region.trim().is_empty() {
            return Err(SqsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        let endpoint_str = config.resolved_endpoint();
        let endpoint = Url::parse(&endpoint_str).map_err(|e| {
            SqsError::ConfigurationError(format!("Invalid endpoint '{}': {}", endpoint_str, e))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SqsError::ConfigurationError(format!(
                    "Endpoint '{}' has no host",
                    endpoint_str
                )))
            }
        };

        let access_key = config
            .access_key_id
            .clone()
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
            .filter(|key| !key.is_empty());
        let secret_key = config
            .secret_access_key
            .clone()
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
            .filter(|key| !key.is_empty());
        let signer = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key,
                secret_key,
                config.region.clone(),
            )),
            _ => {
                warn!(
                    region = %config.region,
                    "No AWS credentials found; connections will be refused"
                );
                None
            }
        };

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SqsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(SqsClient {
                http_client,
                signer,
                endpoint,
                host,
                queue_url_cache: RwLock::new(HashMap::new()),
            }),
            config,
        })
    }

    pub fn config(&self) -> &SqsConfig {
        &self.config
    }
}

impl fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsTransport")
            .field("config", &self.config)
            .field("endpoint", &self.client.endpoint.as_str())
            .finish()
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn connect(&self) -> Result<Box<dyn TransportSession>, GatewayError> {
        if self.client.signer.is_none() {
            return Err(
                SqsError::Authentication("No credentials configured".to_string())
                    .to_gateway_error(),
            );
        }

        Ok(Box::new(SqsSession {
            client: Arc::clone(&self.client),
        }))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}

// ============================================================================
// SQS Session
// ============================================================================

/// One unit of work against SQS
struct SqsSession {
    client: Arc<SqsClient>,
}

#[async_trait]
impl TransportSession for SqsSession {
    fn validate(&self, queue: &QueueAddress, envelope: &Envelope) -> Result<(), GatewayError> {
        build_send_params(queue, envelope)
            .map(|_| ())
            .map_err(SqsError::to_gateway_error)
    }

    async fn send(
        &self,
        queue: &QueueAddress,
        envelope: &Envelope,
    ) -> Result<String, GatewayError> {
        let params = build_send_params(queue, envelope).map_err(SqsError::to_gateway_error)?;
        let response = self
            .client
            .call(queue, TransportOperation::Send, params)
            .await
            .map_err(SqsError::to_gateway_error)?;

        parse_send_message_response(&response).map_err(SqsError::to_gateway_error)
    }

    async fn receive(
        &self,
        queue: &QueueAddress,
        request: ReceiveRequest,
    ) -> Result<Option<Delivery>, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), "ReceiveMessage".to_string());
        params.insert(
            "MaxNumberOfMessages".to_string(),
            request.max_messages.clamp(1, 10).to_string(),
        );
        params.insert(
            "WaitTimeSeconds".to_string(),
            request
                .wait_time_seconds
                .min(ProviderType::AwsSqs.max_wait_seconds())
                .to_string(),
        );
        params.insert("AttributeName.1".to_string(), "All".to_string());
        params.insert("MessageAttributeName.1".to_string(), "All".to_string());

        let response = self
            .client
            .call(queue, TransportOperation::Receive, params)
            .await
            .map_err(SqsError::to_gateway_error)?;

        let deliveries =
            parse_receive_message_response(&response).map_err(SqsError::to_gateway_error)?;
        Ok(deliveries.into_iter().next())
    }

    async fn delete(
        &self,
        queue: &QueueAddress,
        receipt: &ReceiptHandle,
    ) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), "DeleteMessage".to_string());
        params.insert("ReceiptHandle".to_string(), receipt.as_str().to_string());

        self.client
            .call(queue, TransportOperation::Delete, params)
            .await
            .map_err(SqsError::to_gateway_error)?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue: &QueueAddress,
        receipt: &ReceiptHandle,
        visibility_timeout_seconds: u32,
    ) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), "ChangeMessageVisibility".to_string());
        params.insert("ReceiptHandle".to_string(), receipt.as_str().to_string());
        params.insert(
            "VisibilityTimeout".to_string(),
            visibility_timeout_seconds.to_string(),
        );

        self.client
            .call(queue, TransportOperation::ChangeVisibility, params)
            .await
            .map_err(SqsError::to_gateway_error)?;
        Ok(())
    }

    async fn purge(&self, queue: &QueueAddress) -> Result<(), GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), "PurgeQueue".to_string());

        self.client
            .call(queue, TransportOperation::Purge, params)
            .await
            .map_err(SqsError::to_gateway_error)?;
        Ok(())
    }
}

impl SqsClient {
    /// Resolve the queue URL and issue a queue-scoped action
    async fn call(
        &self,
        queue: &QueueAddress,
        operation: TransportOperation,
        mut params: BTreeMap<String, String>,
    ) -> Result<String, SqsError> {
        let queue_url = self.queue_url(queue).await?;
        params.insert("QueueUrl".to_string(), queue_url);

        debug!(queue = %queue, operation = %operation, "Calling SQS");
        let result = self.make_request(params).await;
        if let Err(e) = &result {
            warn!(
                queue = %queue,
                operation = %operation,
                transient = e.is_transient(),
                error = %e,
                "SQS call failed"
            );
        }
        result
    }

    /// Get the URL of a queue, resolving names through `GetQueueUrl`
    async fn queue_url(&self, queue: &QueueAddress) -> Result<String, SqsError> {
        let queue_name = match queue {
            QueueAddress::Url(url) => return Ok(url.to_string()),
            QueueAddress::Name(name) => name,
        };

        {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(queue_name) {
                return Ok(url.clone());
            }
        }

        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), "GetQueueUrl".to_string());
        params.insert("QueueName".to_string(), queue_name.as_str().to_string());

        let response = self.make_request(params).await.map_err(|e| match e {
            SqsError::QueueNotFound(_) => SqsError::QueueNotFound(queue_name.to_string()),
            other => other,
        })?;
        let queue_url = parse_queue_url_response(&response)?;
        debug!(queue = %queue_name, queue_url = %queue_url, "Resolved queue URL");

        let mut cache = self.queue_url_cache.write().await;
        cache.insert(queue_name.clone(), queue_url.clone());

        Ok(queue_url)
    }

    /// Sign and POST a Query API request to the endpoint
    async fn make_request(&self, mut params: BTreeMap<String, String>) -> Result<String, SqsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| SqsError::Authentication("No credentials configured".to_string()))?;

        params.insert("Version".to_string(), API_VERSION.to_string());
        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let path = self.endpoint.path();
        let auth_headers = signer.sign_request(
            "POST",
            &self.host,
            path,
            &BTreeMap::new(),
            &body,
            &Utc::now(),
        );

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body);
        for (key, value) in auth_headers {
            request = request.header(&key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SqsError::NetworkError(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                SqsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                SqsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| SqsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }
}

// ============================================================================
// Request Building
// ============================================================================

/// Build the SendMessage parameters for an envelope
fn build_send_params(
    queue: &QueueAddress,
    envelope: &Envelope,
) -> Result<BTreeMap<String, String>, SqsError> {
    if envelope.attributes.len() > MAX_MESSAGE_ATTRIBUTES {
        return Err(SqsError::TooManyAttributes {
            count: envelope.attributes.len(),
            max: MAX_MESSAGE_ATTRIBUTES,
        });
    }

    let max_size = ProviderType::AwsSqs.max_message_size();
    let size = envelope.body.len()
        + envelope
            .attributes
            .iter()
            .map(|(name, attribute)| {
                name.len() + attribute.data_type.as_str().len() + attribute.value.len()
            })
            .sum::<usize>();
    if size > max_size {
        return Err(SqsError::MessageTooLarge { size, max_size });
    }

    let mut params = BTreeMap::new();
    params.insert("Action".to_string(), "SendMessage".to_string());
    params.insert("MessageBody".to_string(), envelope.body.clone());

    for (index, (name, attribute)) in envelope.attributes.iter().enumerate() {
        let prefix = format!("MessageAttribute.{}", index + 1);
        params.insert(format!("{}.Name", prefix), name.clone());
        params.insert(format!("{}.Value.StringValue", prefix), attribute.value.clone());
        params.insert(
            format!("{}.Value.DataType", prefix),
            attribute.data_type.as_str().to_string(),
        );
    }

    if queue.is_fifo() {
        let group = envelope
            .attributes
            .get(TOPIC)
            .map(|attribute| attribute.value.as_str())
            .filter(|topic| !topic.is_empty())
            .unwrap_or(DEFAULT_MESSAGE_GROUP);
        let deduplication_id = match envelope.attributes.get(MESSAGE_ID) {
            Some(attribute) => attribute.value.clone(),
            None => format!("{:x}", Sha256::digest(envelope.body.as_bytes())),
        };
        params.insert("MessageGroupId".to_string(), group.to_string());
        params.insert("MessageDeduplicationId".to_string(), deduplication_id);
    }

    Ok(params)
}

// ============================================================================
// Response Parsing
// ============================================================================

fn xml_error(e: impl fmt::Display) -> SqsError {
    SqsError::MalformedResponse(format!("XML parsing error: {}", e))
}

/// Extract the text of the first element with the given name
fn parse_single_element(xml: &str, element: &[u8]) -> Result<Option<String>, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == element => inside = true,
            Ok(Event::Text(e)) if inside => {
                return e
                    .unescape()
                    .map(|s| Some(s.into_owned()))
                    .map_err(xml_error);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == element => inside = false,
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
}

fn parse_queue_url_response(xml: &str) -> Result<String, SqsError> {
    parse_single_element(xml, b"QueueUrl")?
        .ok_or_else(|| SqsError::MissingElement("QueueUrl".to_string()))
}

fn parse_send_message_response(xml: &str) -> Result<String, SqsError> {
    parse_single_element(xml, b"MessageId")?
        .ok_or_else(|| SqsError::MissingElement("MessageId".to_string()))
}

/// Parse an error document into the matching error kind
fn parse_error_response(xml: &str, status_code: u16) -> SqsError {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| format!("Http{}", status_code));
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            SqsError::QueueNotFound(message)
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken"
        | "AccessDenied" => SqsError::Authentication(format!("{}: {}", code, message)),
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" | "MessageNotInflight" => {
            SqsError::InvalidReceipt(message)
        }
        _ if status_code == 401 || status_code == 403 => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        _ => SqsError::ServiceError { code, message },
    }
}

/// Fields of a `<Message>` element gathered while parsing
#[derive(Default)]
struct PartialDelivery {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: String,
    attributes: Attributes,
    receive_count: Option<u32>,
    // Name and value of the <Attribute> or <MessageAttribute> being read
    attribute_name: Option<String>,
    attribute_value: Option<String>,
    attribute_type: Option<String>,
}

impl PartialDelivery {
    fn into_delivery(self) -> Option<Delivery> {
        let receipt_handle = self.receipt_handle?;
        Some(Delivery {
            native_id: self.message_id,
            receipt_handle: ReceiptHandle::new(receipt_handle),
            body: self.body,
            attributes: self.attributes,
            receive_count: self.receive_count,
        })
    }
}

/// Parse a ReceiveMessage response into deliveries
///
/// System attributes (`<Attribute>`) and message attributes
/// (`<MessageAttribute>`) share child element names, so elements are matched
/// by their path rather than by name alone.
fn parse_receive_message_response(xml: &str) -> Result<Vec<Delivery>, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut deliveries = Vec::new();
    let mut current: Option<PartialDelivery> = None;
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"Message" {
                    current = Some(PartialDelivery::default());
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(_)) => {
                let mut message_finished = false;
                if let Some(delivery) = current.as_mut() {
                    let finished = path_tail(&path);
                    match finished.as_slice() {
                        [.., b"Message", b"MessageId"] => {
                            delivery.message_id = Some(text.trim().to_string())
                        }
                        [.., b"Message", b"ReceiptHandle"] => {
                            delivery.receipt_handle = Some(text.trim().to_string())
                        }
                        [.., b"Message", b"Body"] => delivery.body = text.clone(),
                        [.., b"Attribute", b"Name"] | [.., b"MessageAttribute", b"Name"] => {
                            delivery.attribute_name = Some(text.trim().to_string())
                        }
                        [.., b"Attribute", b"Value"] => {
                            delivery.attribute_value = Some(text.trim().to_string())
                        }
                        [.., b"MessageAttribute", b"Value", b"StringValue"] => {
                            delivery.attribute_value = Some(text.clone())
                        }
                        [.., b"MessageAttribute", b"Value", b"DataType"] => {
                            delivery.attribute_type = Some(text.trim().to_string())
                        }
                        [.., b"Message", b"Attribute"] => finish_system_attribute(delivery),
                        [.., b"Message", b"MessageAttribute"] => {
                            finish_message_attribute(delivery)
                        }
                        [.., b"Message"] => message_finished = true,
                        _ => {}
                    }
                }
                if message_finished {
                    match current.take().and_then(PartialDelivery::into_delivery) {
                        Some(delivery) => deliveries.push(delivery),
                        None => warn!("Skipping received message without a receipt handle"),
                    }
                }
                path.pop();
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(deliveries)
}

fn path_tail(path: &[Vec<u8>]) -> Vec<&[u8]> {
    path.iter().map(Vec::as_slice).collect()
}

fn finish_system_attribute(delivery: &mut PartialDelivery) {
    let name = delivery.attribute_name.take();
    let value = delivery.attribute_value.take();
    delivery.attribute_type = None;

    if let (Some("ApproximateReceiveCount"), Some(value)) = (name.as_deref(), value) {
        delivery.receive_count = value.parse().ok();
    }
}

fn finish_message_attribute(delivery: &mut PartialDelivery) {
    let name = delivery.attribute_name.take();
    let value = delivery.attribute_value.take();
    let data_type = delivery.attribute_type.take();

    if let Some(name) = name {
        delivery.attributes.insert(
            name,
            AttributeValue {
                data_type: data_type
                    .as_deref()
                    .map(AttributeDataType::from_label)
                    .unwrap_or(AttributeDataType::String),
                value: value.unwrap_or_default(),
            },
        );
    }
}
