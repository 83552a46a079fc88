// ============================================================================
// Messaging - Kafka-compatible stream plumbing
// ============================================================================
//
// - codec     - SaleEvent wire format
// - redpanda  - producer (circuit breaker protected)
// - consumer  - consumer group with manual commits and partition rewind
//
// The producer and consumer sit behind `EventProducer` / `MessageStream` so
// the publisher, the DLQ and the worker pool run against in-memory doubles
// in tests.
//
// ============================================================================

use async_trait::async_trait;

use crate::utils::IsTransient;

pub mod codec;
mod consumer;
mod redpanda;

#[cfg(test)]
pub mod memory;

pub use consumer::{Delivery, MessageStream, RedpandaConsumer, StreamError};
pub use redpanda::RedpandaClient;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProducerError {
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("send to topic {topic} failed: {reason}")]
    SendFailed { topic: String, reason: String },
}

impl IsTransient for ProducerError {
    fn is_transient(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Send one record; `key` selects the partition
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), ProducerError>;
}
