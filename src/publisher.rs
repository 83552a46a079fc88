use std::sync::Arc;
use uuid::Uuid;

use crate::domain::sale::{ProductId, Quantity, SaleEvent, ValidationError};
use crate::messaging::{codec, EventProducer, ProducerError};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Sale Publisher
// ============================================================================
//
// Producer side: validate the request, build a SaleEvent with a fresh id and
// send it keyed by product id (so every sale of one product lands on the same
// partition, in order). Does not wait for the stock update.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid sale request: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to encode sale event: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("sale topic unavailable: {0}")]
    Unavailable(ProducerError),
}

pub struct SalePublisher {
    producer: Arc<dyn EventProducer>,
    topic: String,
    retry_config: RetryConfig,
    metrics: Arc<Metrics>,
}

impl SalePublisher {
    pub fn new(producer: Arc<dyn EventProducer>, topic: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            producer,
            topic: topic.into(),
            retry_config: RetryConfig::default(),
            metrics,
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Publish one sale and return its event id
    pub async fn publish_sale(&self, product_id: &str, quantity: i64) -> Result<Uuid, PublishError> {
        let event = match Self::build_event(product_id, quantity) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_sale_published("invalid");
                return Err(e.into());
            }
        };

        let payload = codec::encode(&event)?;
        let key = event.product_id.as_str();
        let topic = self.topic.as_str();

        let mut attempts = 0;
        let result = retry_on_transient("publish_sale", self.retry_config.clone(), |attempt| {
            attempts = attempt;
            let producer = self.producer.clone();
            let payload = &payload;
            async move { producer.send(topic, key, payload).await }
        })
        .await;
        if attempts > 1 {
            self.metrics
                .record_retry_outcome("publish_sale", matches!(result, RetryResult::Success(_)));
        }

        match result {
            RetryResult::Success(()) => {
                self.metrics.record_sale_published("published");
                tracing::info!(
                    event_id = %event.event_id,
                    product_id = %event.product_id,
                    quantity = event.quantity.get(),
                    topic = %self.topic,
                    "Sale published"
                );
                Ok(event.event_id)
            }
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => {
                self.metrics.record_sale_published("failed");
                tracing::error!(
                    event_id = %event.event_id,
                    product_id = %event.product_id,
                    error = %e,
                    "Failed to publish sale"
                );
                Err(PublishError::Unavailable(e))
            }
        }
    }

    fn build_event(product_id: &str, quantity: i64) -> Result<SaleEvent, ValidationError> {
        let product_id = ProductId::parse(product_id)?;
        let quantity = Quantity::new(quantity)?;
        Ok(SaleEvent::new(product_id, quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::memory::RecordingProducer;
    use std::time::Duration;

    fn publisher(producer: Arc<RecordingProducer>) -> SalePublisher {
        publisher_with_metrics(producer, Arc::new(Metrics::new().unwrap()))
    }

    fn publisher_with_metrics(producer: Arc<RecordingProducer>, metrics: Arc<Metrics>) -> SalePublisher {
        SalePublisher::new(producer, "sales", metrics).with_retry_config(RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        })
    }

    #[tokio::test]
    async fn test_publish_sends_event_keyed_by_product() {
        let producer = Arc::new(RecordingProducer::new());
        let publisher = publisher(producer.clone());

        let event_id = publisher.publish_sale("P1", 3).await.unwrap();

        let sent = producer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "sales");
        assert_eq!(sent[0].key, "P1");

        let event = codec::decode(&sent[0].payload).unwrap();
        assert_eq!(event.event_id, event_id);
        assert_eq!(event.product_id.as_str(), "P1");
        assert_eq!(event.quantity.get(), 3);
    }

    #[tokio::test]
    async fn test_each_publish_gets_a_fresh_event_id() {
        let producer = Arc::new(RecordingProducer::new());
        let publisher = publisher(producer);

        let a = publisher.publish_sale("P1", 1).await.unwrap();
        let b = publisher.publish_sale("P1", 1).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_not_sent() {
        let producer = Arc::new(RecordingProducer::new());
        let publisher = publisher(producer.clone());

        assert!(matches!(
            publisher.publish_sale("", 1).await,
            Err(PublishError::Validation(ValidationError::EmptyProductId))
        ));
        assert!(matches!(
            publisher.publish_sale("P1", 0).await,
            Err(PublishError::Validation(ValidationError::NonPositiveQuantity(0)))
        ));
        assert!(producer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broker_outage_surfaces_as_unavailable() {
        let producer = Arc::new(RecordingProducer::new());
        producer.set_failing(true);
        let publisher = publisher(producer);

        assert!(matches!(
            publisher.publish_sale("P1", 1).await,
            Err(PublishError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_outcomes_are_recorded_both_ways() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let producer = Arc::new(RecordingProducer::new());
        let publisher = publisher_with_metrics(producer.clone(), metrics.clone());

        // first attempt fails, the retry gets through
        producer.fail_next(1);
        publisher.publish_sale("P1", 1).await.unwrap();
        assert_eq!(metrics.retry_success.with_label_values(&["publish_sale"]).get(), 1);
        assert_eq!(metrics.retry_failure.with_label_values(&["publish_sale"]).get(), 0);

        producer.set_failing(true);
        assert!(publisher.publish_sale("P1", 1).await.is_err());
        assert_eq!(metrics.retry_failure.with_label_values(&["publish_sale"]).get(), 1);

        // no retry needed, nothing recorded
        producer.set_failing(false);
        publisher.publish_sale("P1", 1).await.unwrap();
        assert_eq!(metrics.retry_success.with_label_values(&["publish_sale"]).get(), 1);
    }
}
