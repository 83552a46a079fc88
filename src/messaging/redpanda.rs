use async_trait::async_trait;
use rdkafka::{
    producer::{FutureProducer, FutureRecord},
    config::ClientConfig,
    util::Timeout,
};
use std::time::Duration;

use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use super::{EventProducer, ProducerError};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaClient {
    pub fn new(brokers: &str, circuit_breaker: CircuitBreaker) -> Result<Self, ProducerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| ProducerError::SendFailed {
                topic: "*".to_string(),
                reason: format!("failed to create producer: {e}"),
            })?;

        tracing::info!(brokers = %brokers, "Redpanda producer created");

        Ok(Self {
            producer,
            circuit_breaker,
        })
    }

    /// Breaker settings used for the producer when none are configured
    pub fn default_breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,           // Open after 5 failures
            timeout: Duration::from_secs(30),  // Wait 30s before retry
            success_threshold: 3,           // Need 3 successes to close
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        self.circuit_breaker.clone()
    }
}

#[async_trait]
impl EventProducer for RedpandaClient {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), ProducerError> {
        let result = self.circuit_breaker.call(async {
            let record = FutureRecord::to(topic)
                .key(key)
                .payload(payload);

            self.producer
                .send(record, Timeout::After(SEND_TIMEOUT))
                .await
                .map(|_| ())
                .map_err(|(e, _)| e)
        }).await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    topic = %topic,
                    key = %key,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    topic = %topic,
                    "Circuit breaker open - Redpanda unavailable"
                );
                Err(ProducerError::CircuitOpen("redpanda".to_string()))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(
                    error = %e,
                    topic = %topic,
                    "Failed to publish to Redpanda"
                );
                Err(ProducerError::SendFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
