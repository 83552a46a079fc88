use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Sale Stream Consumer
// ============================================================================
//
// At-least-once consumption with manual offset commits:
// - `commit` is called only after a delivery was fully handled
// - `rewind` seeks the partition back to an unhandled delivery so the
//   consumer fetches it again (the same thing a restart would do, since its
//   offset was never committed)
//
// ============================================================================

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// One message pulled from the stream, detached from the client's buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("failed to create consumer: {0}")]
    Setup(String),

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("failed to commit {topic}[{partition}]@{offset}: {reason}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("failed to rewind {topic}[{partition}] to {offset}: {reason}")]
    Rewind {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("stream closed")]
    Closed,
}

#[async_trait]
pub trait MessageStream: Send + Sync {
    async fn next_delivery(&self) -> Result<Delivery, StreamError>;

    /// Acknowledge `delivery` and everything before it on its partition
    fn commit(&self, delivery: &Delivery) -> Result<(), StreamError>;

    /// Make the stream hand out `delivery` again
    async fn rewind(&self, delivery: &Delivery) -> Result<(), StreamError>;
}

pub struct RedpandaConsumer {
    consumer: Arc<StreamConsumer>,
}

impl RedpandaConsumer {
    pub fn new(brokers: &str, group_id: &str, topics: &[&str]) -> Result<Self, StreamError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")  // Manual commit for at-least-once
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| StreamError::Setup(e.to_string()))?;

        consumer
            .subscribe(topics)
            .map_err(|e| StreamError::Setup(format!("failed to subscribe to {topics:?}: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            group_id = %group_id,
            topics = ?topics,
            manual_commit = true,
            "Subscribed to sale topics"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl MessageStream for RedpandaConsumer {
    async fn next_delivery(&self) -> Result<Delivery, StreamError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| StreamError::Receive(e.to_string()))?;

        let delivery = Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        };

        tracing::trace!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "Received message"
        );

        Ok(delivery)
    }

    fn commit(&self, delivery: &Delivery) -> Result<(), StreamError> {
        let commit_error = |reason: String| StreamError::Commit {
            topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            reason,
        };

        // the committed offset is the next one to read
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&delivery.topic, delivery.partition, Offset::Offset(delivery.offset + 1))
            .map_err(|e| commit_error(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| commit_error(e.to_string()))
    }

    async fn rewind(&self, delivery: &Delivery) -> Result<(), StreamError> {
        let rewind_error = |reason: String| StreamError::Rewind {
            topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            reason,
        };

        // seek blocks for up to SEEK_TIMEOUT
        let consumer = self.consumer.clone();
        let topic = delivery.topic.clone();
        let partition = delivery.partition;
        let offset = delivery.offset;
        let seek = tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        });

        match seek.await {
            Ok(result) => result.map_err(|e| rewind_error(e.to_string())),
            Err(e) => Err(rewind_error(format!("seek task failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn test_rewind_of_unassigned_partition_reports_offset() {
        let consumer = RedpandaConsumer::new("127.0.0.1:1", "rewind-test", &["sales"]).unwrap();
        let delivery = Delivery {
            topic: "sales".into(),
            partition: 3,
            offset: 42,
            key: None,
            payload: Vec::new(),
        };

        let result = consumer.rewind(&delivery).await;
        assert!(matches!(
            result,
            Err(StreamError::Rewind { partition: 3, offset: 42, .. })
        ));
    }
}
