//! In-memory visibility-timeout queue for testing and development.
//!
//! Behaves like the SQS model the gateway targets:
//! - Receive hides an entry for the visibility timeout and hands out a fresh
//!   receipt handle per delivery
//! - Only the most recent receipt handle of an entry is valid; once the
//!   visibility window lapses the entry is visible again and its old handle
//!   is rejected
//! - Receive long-polls up to the requested wait
//!
//! Test hooks allow failing selected operations, counting calls and
//! observing how many sessions are currently open.

use crate::codec::{Attributes, Envelope};
use crate::config::InMemoryConfig;
use crate::error::GatewayError;
use crate::message::{QueueAddress, ReceiptHandle};
use crate::transport::{
    Delivery, ProviderType, QueueTransport, ReceiveRequest, TransportOperation, TransportSession,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in a queue
#[derive(Clone)]
struct StoredMessage {
    native_id: String,
    body: String,
    attributes: Attributes,
    receive_count: u32,
}

/// A message currently hidden from receivers
struct InFlightMessage {
    message: StoredMessage,
    receipt_handle: String,
    visible_at: Instant,
}

/// State of a single queue; entries are ordered by enqueue sequence
#[derive(Default)]
struct InMemoryQueue {
    available: BTreeMap<u64, StoredMessage>,
    in_flight: HashMap<u64, InFlightMessage>,
}

impl InMemoryQueue {
    /// Return entries whose visibility window has lapsed to the queue
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(sequence, _)| *sequence)
            .collect();

        for sequence in expired {
            if let Some(entry) = self.in_flight.remove(&sequence) {
                self.available.insert(sequence, entry.message);
            }
        }
    }

    fn find_in_flight(&self, receipt: &ReceiptHandle) -> Option<u64> {
        self.in_flight
            .iter()
            .find(|(_, entry)| entry.receipt_handle == receipt.as_str())
            .map(|(sequence, _)| *sequence)
    }
}

#[derive(Default)]
struct QueueStorage {
    queues: HashMap<String, InMemoryQueue>,
    next_sequence: u64,
}

impl QueueStorage {
    fn get_or_create_queue(&mut self, queue: &QueueAddress) -> &mut InMemoryQueue {
        self.queues.entry(queue.as_str().to_string()).or_default()
    }
}

/// Operations configured to fail, and calls observed so far
#[derive(Default)]
struct FailurePlan {
    fail_connect: bool,
    failing: HashSet<TransportOperation>,
    calls: HashMap<TransportOperation, usize>,
}

struct SharedState {
    storage: Mutex<QueueStorage>,
    failures: Mutex<FailurePlan>,
    open_sessions: AtomicUsize,
    visibility_timeout: Duration,
}

impl SharedState {
    fn storage(&self) -> MutexGuard<'_, QueueStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, FailurePlan> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and fail it when so configured
    fn check(&self, operation: TransportOperation) -> Result<(), GatewayError> {
        let mut failures = self.failures();
        *failures.calls.entry(operation).or_insert(0) += 1;

        if failures.failing.contains(&operation) {
            return Err(GatewayError::ConnectionFailed {
                message: format!("injected {} failure", operation),
            });
        }
        Ok(())
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport
///
/// Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<SharedState>,
}

impl InMemoryTransport {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            state: Arc::new(SharedState {
                storage: Mutex::new(QueueStorage::default()),
                failures: Mutex::new(FailurePlan::default()),
                open_sessions: AtomicUsize::new(0),
                visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            }),
        }
    }

    /// Make every call of `operation` fail with a connection error
    pub fn fail_operation(&self, operation: TransportOperation) {
        self.state.failures().failing.insert(operation);
    }

    /// Make every connection attempt fail
    pub fn fail_connections(&self) {
        self.state.failures().fail_connect = true;
    }

    /// Remove all configured failures
    pub fn clear_failures(&self) {
        let mut failures = self.state.failures();
        failures.fail_connect = false;
        failures.failing.clear();
    }

    /// Number of times `operation` has been attempted
    pub fn call_count(&self, operation: TransportOperation) -> usize {
        self.state
            .failures()
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Sessions connected and not yet dropped
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Entries currently visible to receivers
    pub fn visible_count(&self, queue: &QueueAddress) -> usize {
        let mut storage = self.state.storage();
        let queue = storage.get_or_create_queue(queue);
        queue.reclaim_expired(Instant::now());
        queue.available.len()
    }

    /// Entries received and not yet deleted or made visible again
    pub fn in_flight_count(&self, queue: &QueueAddress) -> usize {
        let mut storage = self.state.storage();
        let queue = storage.get_or_create_queue(queue);
        queue.reclaim_expired(Instant::now());
        queue.in_flight.len()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn connect(&self) -> Result<Box<dyn TransportSession>, GatewayError> {
        if self.state.failures().fail_connect {
            return Err(GatewayError::ConnectionFailed {
                message: "injected connection failure".to_string(),
            });
        }

        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
        }))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

// ============================================================================
// InMemorySession
// ============================================================================

struct InMemorySession {
    state: Arc<SharedState>,
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemorySession {
    /// Take the oldest visible entry, hiding it behind a new receipt
    fn try_receive(&self, queue: &QueueAddress) -> Option<Delivery> {
        let now = Instant::now();
        let mut storage = self.state.storage();
        let queue = storage.get_or_create_queue(queue);
        queue.reclaim_expired(now);

        let (sequence, mut message) = queue.available.pop_first()?;
        message.receive_count += 1;
        let receipt_handle = uuid::Uuid::new_v4().to_string();

        let delivery = Delivery {
            native_id: Some(message.native_id.clone()),
            receipt_handle: ReceiptHandle::new(receipt_handle.clone()),
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            receive_count: Some(message.receive_count),
        };

        queue.in_flight.insert(
            sequence,
            InFlightMessage {
                message,
                receipt_handle,
                visible_at: now + self.state.visibility_timeout,
            },
        );

        Some(delivery)
    }
}

#[async_trait]
impl TransportSession for InMemorySession {
    fn validate(&self, _queue: &QueueAddress, envelope: &Envelope) -> Result<(), GatewayError> {
        let max_size = ProviderType::InMemory.max_message_size();
        if envelope.body.len() > max_size {
            return Err(GatewayError::MessageTooLarge {
                size: envelope.body.len(),
                max_size,
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        queue: &QueueAddress,
        envelope: &Envelope,
    ) -> Result<String, GatewayError> {
        self.state.check(TransportOperation::Send)?;
        self.validate(queue, envelope)?;

        let native_id = uuid::Uuid::new_v4().to_string();
        let mut storage = self.state.storage();
        let sequence = storage.next_sequence;
        storage.next_sequence += 1;
        storage.get_or_create_queue(queue).available.insert(
            sequence,
            StoredMessage {
                native_id: native_id.clone(),
                body: envelope.body.clone(),
                attributes: envelope.attributes.clone(),
                receive_count: 0,
            },
        );

        debug!(queue = %queue, native_id = %native_id, "Stored message");
        Ok(native_id)
    }

    async fn receive(
        &self,
        queue: &QueueAddress,
        request: ReceiveRequest,
    ) -> Result<Option<Delivery>, GatewayError> {
        self.state.check(TransportOperation::Receive)?;

        let deadline = Instant::now() + Duration::from_secs(u64::from(request.wait_time_seconds));
        loop {
            if let Some(delivery) = self.try_receive(queue) {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(
        &self,
        queue: &QueueAddress,
        receipt: &ReceiptHandle,
    ) -> Result<(), GatewayError> {
        self.state.check(TransportOperation::Delete)?;

        let mut storage = self.state.storage();
        let queue = storage.get_or_create_queue(queue);
        queue.reclaim_expired(Instant::now());

        let sequence = queue
            .find_in_flight(receipt)
            .ok_or_else(|| GatewayError::ReceiptInvalid {
                receipt: receipt.to_string(),
            })?;
        queue.in_flight.remove(&sequence);
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue: &QueueAddress,
        receipt: &ReceiptHandle,
        visibility_timeout_seconds: u32,
    ) -> Result<(), GatewayError> {
        self.state.check(TransportOperation::ChangeVisibility)?;

        let now = Instant::now();
        let mut storage = self.state.storage();
        let queue = storage.get_or_create_queue(queue);
        queue.reclaim_expired(now);

        let sequence = queue
            .find_in_flight(receipt)
            .ok_or_else(|| GatewayError::ReceiptInvalid {
                receipt: receipt.to_string(),
            })?;

        if visibility_timeout_seconds == 0 {
            if let Some(entry) = queue.in_flight.remove(&sequence) {
                queue.available.insert(sequence, entry.message);
            }
        } else if let Some(entry) = queue.in_flight.get_mut(&sequence) {
            entry.visible_at =
                now + Duration::from_secs(u64::from(visibility_timeout_seconds));
        }
        Ok(())
    }

    async fn purge(&self, queue: &QueueAddress) -> Result<(), GatewayError> {
        self.state.check(TransportOperation::Purge)?;

        let mut storage = self.state.storage();
        let queue = storage.get_or_create_queue(queue);
        queue.available.clear();
        queue.in_flight.clear();
        Ok(())
    }
}
