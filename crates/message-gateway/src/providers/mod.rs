//! Queue transport implementations.
//!
//! This module contains concrete implementations of the `QueueTransport` and
//! `TransportSession` traits for the supported backends.

pub mod memory;
pub mod sqs;

pub use memory::InMemoryTransport;
pub use sqs::{SqsError, SqsTransport};
