use base64::Engine;
use chrono::{DateTime, Utc};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::messaging::{Delivery, EventProducer, ProducerError};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Receives sale messages that can never be applied:
// - payloads that fail to decode
// - sales rejected for insufficient stock
// - sales hitting a non-recoverable store or ledger error
//
// Each dead letter is forwarded to the dead-letter topic (with retry) and
// kept in a bounded in-process buffer that the HTTP surface can query.
// The original bytes always travel base64-encoded; a readable copy is added
// when they are valid UTF-8.
// A dead letter only counts as accepted once the topic has it; otherwise the
// caller leaves the source message unacknowledged.
//
// ============================================================================

pub const DEFAULT_DLQ_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    Malformed,
    InsufficientStock,
    Unprocessable,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Malformed => "malformed",
            DeadLetterReason::InsufficientStock => "insufficient_stock",
            DeadLetterReason::Unprocessable => "unprocessable",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub event_id: Option<Uuid>,
    pub product_id: Option<String>,
    pub reason: DeadLetterReason,
    pub error_message: String,
    /// Source payload as text, when it is valid UTF-8
    pub payload: Option<String>,
    /// Exact source payload bytes
    pub payload_base64: String,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DlqError {
    #[error("failed to encode dead letter: {0}")]
    Encoding(String),

    #[error("dead-letter topic unavailable: {0}")]
    Unavailable(#[from] ProducerError),
}

pub struct DlqActor {
    producer: Arc<dyn EventProducer>,
    topic: String,
    retry_config: RetryConfig,
    metrics: Arc<Metrics>,
    capacity: usize,
    buffer: VecDeque<DeadLetter>,
    total: u64,
    by_reason: HashMap<DeadLetterReason, u64>,
}

impl DlqActor {
    pub fn new(
        producer: Arc<dyn EventProducer>,
        topic: impl Into<String>,
        retry_config: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            retry_config,
            metrics,
            capacity: DEFAULT_DLQ_CAPACITY,
            buffer: VecDeque::new(),
            total: 0,
            by_reason: HashMap::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    async fn forward(&self, letter: &DeadLetter) -> Result<(), DlqError> {
        let payload = serde_json::to_vec(letter).map_err(|e| DlqError::Encoding(e.to_string()))?;
        let key = letter
            .product_id
            .clone()
            .unwrap_or_else(|| letter.id.to_string());

        let producer = self.producer.clone();
        let topic = self.topic.as_str();
        let result = retry_on_transient("dlq_forward", self.retry_config.clone(), |_attempt| {
            let producer = producer.clone();
            let key = key.clone();
            let payload = payload.clone();
            async move { producer.send(topic, &key, &payload).await }
        })
        .await;

        let succeeded = matches!(result, RetryResult::Success(_));
        self.metrics.record_retry_outcome("dlq_forward", succeeded);
        result.into_result().map_err(DlqError::from)
    }

    fn remember(&mut self, letter: DeadLetter) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.total += 1;
        *self.by_reason.entry(letter.reason).or_default() += 1;
        self.metrics.record_dlq_message(letter.reason.as_str());
        self.buffer.push_back(letter);
    }
}

impl Actor for DlqActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(
            topic = %state.topic,
            capacity = state.capacity,
            "DlqActor started - Dead Letter Queue ready"
        );
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddToDlq {
    pub event_id: Option<Uuid>,
    pub product_id: Option<String>,
    pub reason: DeadLetterReason,
    pub error_message: String,
    pub payload: Vec<u8>,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
}

impl AddToDlq {
    /// Dead letter for `delivery`, identified as far as it could be decoded
    pub fn for_delivery(delivery: &Delivery, reason: DeadLetterReason, error: impl ToString) -> Self {
        Self {
            event_id: None,
            product_id: None,
            reason,
            error_message: error.to_string(),
            payload: delivery.payload.clone(),
            source_topic: delivery.topic.clone(),
            source_partition: delivery.partition,
            source_offset: delivery.offset,
        }
    }

    pub fn with_event(mut self, event_id: Uuid, product_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id);
        self.product_id = Some(product_id.into());
        self
    }
}

pub struct GetDlqMessages {
    pub limit: usize,
}

pub struct GetDlqStats;

/// Most recent dead letters, newest first
#[derive(Debug, Clone, Serialize)]
pub struct DlqMessages(pub Vec<DeadLetter>);

#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub total_messages: u64,
    pub buffered_messages: usize,
    pub by_reason: HashMap<DeadLetterReason, u64>,
}

impl Reply for DlqMessages {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

impl Reply for DlqStats {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Handlers
// ============================================================================

impl Message<AddToDlq> for DlqActor {
    type Reply = Result<(), DlqError>;

    async fn handle(&mut self, msg: AddToDlq, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let letter = DeadLetter {
            id: Uuid::now_v7(),
            event_id: msg.event_id,
            product_id: msg.product_id,
            reason: msg.reason,
            error_message: msg.error_message,
            payload: String::from_utf8(msg.payload.clone()).ok(),
            payload_base64: base64::engine::general_purpose::STANDARD.encode(&msg.payload),
            source_topic: msg.source_topic,
            source_partition: msg.source_partition,
            source_offset: msg.source_offset,
            failed_at: Utc::now(),
        };

        tracing::error!(
            dead_letter_id = %letter.id,
            event_id = ?letter.event_id,
            product_id = ?letter.product_id,
            reason = letter.reason.as_str(),
            error = %letter.error_message,
            partition = letter.source_partition,
            offset = letter.source_offset,
            "Adding message to Dead Letter Queue"
        );

        self.forward(&letter).await?;

        tracing::info!(dead_letter_id = %letter.id, topic = %self.topic, "Dead letter published");
        self.remember(letter);
        Ok(())
    }
}

impl Message<GetDlqMessages> for DlqActor {
    type Reply = DlqMessages;

    async fn handle(&mut self, msg: GetDlqMessages, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        DlqMessages(self.buffer.iter().rev().take(msg.limit).cloned().collect())
    }
}

impl Message<GetDlqStats> for DlqActor {
    type Reply = DlqStats;

    async fn handle(&mut self, _msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        DlqStats {
            total_messages: self.total,
            buffered_messages: self.buffer.len(),
            by_reason: self.by_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::memory::RecordingProducer;
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn delivery(offset: i64, payload: &str) -> Delivery {
        Delivery {
            topic: "sales".into(),
            partition: 0,
            offset,
            key: None,
            payload: payload.as_bytes().to_vec(),
        }
    }

    fn spawn(producer: Arc<RecordingProducer>, capacity: usize) -> ActorRef<DlqActor> {
        let metrics = Arc::new(Metrics::new().unwrap());
        DlqActor::spawn(
            DlqActor::new(producer, "sales.dlq", fast_retry(), metrics).with_capacity(capacity),
        )
    }

    #[tokio::test]
    async fn test_dead_letter_is_forwarded_and_buffered() {
        let producer = Arc::new(RecordingProducer::new());
        let dlq = spawn(producer.clone(), 10);

        let event_id = Uuid::new_v4();
        dlq.ask(
            AddToDlq::for_delivery(&delivery(7, "{}"), DeadLetterReason::InsufficientStock, "no stock")
                .with_event(event_id, "P1"),
        )
        .await
        .unwrap();

        let sent = producer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "sales.dlq");
        assert_eq!(sent[0].key, "P1");

        let forwarded: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(forwarded["reason"], "insufficient_stock");
        assert_eq!(forwarded["source_offset"], 7);

        let DlqMessages(messages) = dlq.ask(GetDlqMessages { limit: 10 }).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event_id, Some(event_id));
    }

    #[tokio::test]
    async fn test_binary_payload_survives_forwarding() {
        let producer = Arc::new(RecordingProducer::new());
        let dlq = spawn(producer.clone(), 10);

        let raw = vec![0xff, 0xfe, 0x00, 0x80];
        let mut source = delivery(3, "");
        source.payload = raw.clone();
        dlq.ask(AddToDlq::for_delivery(&source, DeadLetterReason::Malformed, "not utf-8"))
            .await
            .unwrap();

        let forwarded: serde_json::Value = serde_json::from_slice(&producer.sent()[0].payload).unwrap();
        assert!(forwarded["payload"].is_null());
        let encoded = forwarded["payload_base64"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, raw);
    }

    #[tokio::test]
    async fn test_text_payload_is_kept_readable() {
        let producer = Arc::new(RecordingProducer::new());
        let dlq = spawn(producer.clone(), 10);

        dlq.ask(AddToDlq::for_delivery(&delivery(1, "{\"bad\""), DeadLetterReason::Malformed, "eof"))
            .await
            .unwrap();

        let DlqMessages(messages) = dlq.ask(GetDlqMessages { limit: 1 }).await.unwrap();
        assert_eq!(messages[0].payload.as_deref(), Some("{\"bad\""));
        assert_eq!(messages[0].payload_base64, "eyJiYWQi");
    }

    #[tokio::test]
    async fn test_unavailable_topic_is_reported() {
        let producer = Arc::new(RecordingProducer::new());
        producer.set_failing(true);
        let dlq = spawn(producer, 10);

        let result = dlq
            .ask(AddToDlq::for_delivery(&delivery(0, "garbage"), DeadLetterReason::Malformed, "bad json"))
            .await;
        assert!(result.is_err());

        let stats = dlq.ask(GetDlqStats).await.unwrap();
        assert_eq!(stats.total_messages, 0);
    }

    #[tokio::test]
    async fn test_buffer_keeps_most_recent() {
        let producer = Arc::new(RecordingProducer::new());
        let dlq = spawn(producer, 2);

        for offset in 0..3 {
            dlq.ask(AddToDlq::for_delivery(&delivery(offset, "x"), DeadLetterReason::Malformed, "bad"))
                .await
                .unwrap();
        }

        let DlqMessages(messages) = dlq.ask(GetDlqMessages { limit: 10 }).await.unwrap();
        let offsets: Vec<i64> = messages.iter().map(|m| m.source_offset).collect();
        assert_eq!(offsets, vec![2, 1]);

        let stats = dlq.ask(GetDlqStats).await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.buffered_messages, 2);
        assert_eq!(stats.by_reason.get(&DeadLetterReason::Malformed), Some(&3));
    }
}
