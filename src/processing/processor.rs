use kameo::actor::ActorRef;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::actors::{AddToDlq, DeadLetterReason, DlqActor, HealthMonitorActor, RaiseAlert};
use crate::domain::sale::SaleEvent;
use crate::inventory::{Claim, IdempotencyGuard, LedgerError, StockLedger, StoreError};
use crate::messaging::{codec, Delivery};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, IsTransient, RetryConfig, RetryResult};

// ============================================================================
// Sale Event Processor
// ============================================================================
//
// Per message:
//
//   RECEIVED ──decode──▶ DECODED ──claim──▶ DUPLICATE ─────────────────▶ ack
//       │                   │
//       │ DecodeError       └──▶ APPLYING ──▶ APPLIED ─────────────────▶ ack
//       ▼                            │
//   REJECTED → DLQ → ack             ├──▶ insufficient stock → DLQ + alert → ack
//                                    ├──▶ permanent error    → DLQ + alert → ack
//                                    └──▶ transient, retries exhausted
//                                             → release claim + alert → redeliver
//
// The stock write flips the event's marker to applied atomically, so a crash
// at any point either leaves the sale unapplied (pending marker, reclaimable
// after its lease) or applied (duplicate on redelivery).
//
// ============================================================================

/// What the consumer does with the source message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Commit the offset
    Ack,
    /// Leave uncommitted and have the stream deliver it again
    Redeliver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied { new_quantity: i64 },
    Duplicate,
    Rejected,
    InsufficientStock,
    Unprocessable,
    Redeliver,
}

impl Outcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            Outcome::Redeliver => Disposition::Redeliver,
            _ => Disposition::Ack,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "applied",
            Outcome::Duplicate => "duplicate",
            Outcome::Rejected => "rejected",
            Outcome::InsufficientStock => "insufficient_stock",
            Outcome::Unprocessable => "unprocessable",
            Outcome::Redeliver => "redeliver",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    #[error("event {0} is being applied by another worker")]
    InFlight(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl IsTransient for ProcessError {
    fn is_transient(&self) -> bool {
        match self {
            ProcessError::InFlight(_) => true,
            ProcessError::Store(e) => e.is_transient(),
            ProcessError::Ledger(e) => e.is_transient(),
        }
    }
}

enum Applied {
    Now(i64),
    Already,
}

pub struct SaleEventProcessor {
    ledger: Arc<StockLedger>,
    guard: Arc<IdempotencyGuard>,
    dlq: Option<ActorRef<DlqActor>>,
    health: Option<ActorRef<HealthMonitorActor>>,
    metrics: Arc<Metrics>,
    retry_config: RetryConfig,
}

impl SaleEventProcessor {
    pub fn new(ledger: Arc<StockLedger>, guard: Arc<IdempotencyGuard>, metrics: Arc<Metrics>) -> Self {
        Self {
            ledger,
            guard,
            dlq: None,
            health: None,
            metrics,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_dlq(mut self, dlq: ActorRef<DlqActor>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn with_health_monitor(mut self, health: ActorRef<HealthMonitorActor>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Handle one delivery. Never fails: every error maps to an outcome.
    pub async fn process(&self, delivery: &Delivery) -> Outcome {
        let started = Instant::now();
        let outcome = self.handle(delivery).await;
        self.metrics
            .record_sale_processed(outcome.as_str(), started.elapsed().as_secs_f64());
        outcome
    }

    async fn handle(&self, delivery: &Delivery) -> Outcome {
        let event = match codec::decode(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Rejecting undecodable sale message"
                );
                let letter = AddToDlq::for_delivery(delivery, DeadLetterReason::Malformed, &e);
                return if self.dead_letter(letter).await {
                    Outcome::Rejected
                } else {
                    Outcome::Redeliver
                };
            }
        };

        let mut attempts = 0;
        let result = retry_on_transient("apply_sale", self.retry_config.clone(), |attempt| {
            attempts = attempt;
            self.try_apply(&event)
        })
        .await;
        if attempts > 1 {
            self.metrics
                .record_retry_outcome("apply_sale", matches!(result, RetryResult::Success(_)));
        }

        match result {
            RetryResult::Success(Applied::Now(new_quantity)) => {
                tracing::info!(
                    event_id = %event.event_id,
                    event_type = event.event_type(),
                    product_id = %event.product_id,
                    quantity = event.quantity.get(),
                    new_quantity = new_quantity,
                    "Sale applied"
                );
                Outcome::Applied { new_quantity }
            }
            RetryResult::Success(Applied::Already) => {
                tracing::info!(
                    event_id = %event.event_id,
                    product_id = %event.product_id,
                    "Duplicate sale event, already applied"
                );
                Outcome::Duplicate
            }
            RetryResult::PermanentFailure(e) => self.fail_permanently(delivery, &event, e).await,
            RetryResult::Failed(e) => {
                self.alert(
                    "processor",
                    format!(
                        "sale {} for {} still failing after {} attempts: {}",
                        event.event_id, event.product_id, attempts, e
                    ),
                )
                .await;
                Outcome::Redeliver
            }
        }
    }

    async fn try_apply(&self, event: &SaleEvent) -> Result<Applied, ProcessError> {
        match self.guard.claim(event.event_id).await? {
            Claim::Duplicate => return Ok(Applied::Already),
            Claim::InFlight => return Err(ProcessError::InFlight(event.event_id)),
            Claim::Acquired => {}
        }

        match self.ledger.apply_sale(event, self.guard.retention()).await {
            Ok(new_quantity) => Ok(Applied::Now(new_quantity)),
            Err(e) => {
                if e.is_transient() {
                    self.release_claim(event.event_id).await;
                }
                Err(e.into())
            }
        }
    }

    /// Dead-letter an event that can never be applied and mark it handled.
    async fn fail_permanently(&self, delivery: &Delivery, event: &SaleEvent, error: ProcessError) -> Outcome {
        let (reason, outcome) = match &error {
            ProcessError::Ledger(LedgerError::InsufficientStock { .. }) => {
                (DeadLetterReason::InsufficientStock, Outcome::InsufficientStock)
            }
            _ => (DeadLetterReason::Unprocessable, Outcome::Unprocessable),
        };

        tracing::warn!(
            event_id = %event.event_id,
            product_id = %event.product_id,
            error = %error,
            "Sale cannot be applied"
        );

        let letter = AddToDlq::for_delivery(delivery, reason, &error)
            .with_event(event.event_id, event.product_id.as_str());
        if !self.dead_letter(letter).await {
            self.release_claim(event.event_id).await;
            return Outcome::Redeliver;
        }

        self.alert(
            "processor",
            format!("sale {} for {} dead-lettered: {}", event.event_id, event.product_id, error),
        )
        .await;

        if let Err(e) = self.guard.complete(event.event_id).await {
            tracing::warn!(
                event_id = %event.event_id,
                error = %e,
                "Failed to mark dead-lettered event handled"
            );
        }

        outcome
    }

    async fn release_claim(&self, event_id: Uuid) {
        if let Err(e) = self.guard.release(event_id).await {
            // the pending lease still expires on its own
            tracing::warn!(event_id = %event_id, error = %e, "Failed to release claim");
        }
    }

    /// True once the dead letter is safely stored
    async fn dead_letter(&self, letter: AddToDlq) -> bool {
        let Some(dlq) = &self.dlq else {
            tracing::error!(
                reason = letter.reason.as_str(),
                error = %letter.error_message,
                "No dead letter queue configured, dropping message"
            );
            return true;
        };

        match dlq.ask(letter).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = ?e, "Dead letter queue rejected message");
                false
            }
        }
    }

    async fn alert(&self, component: &str, message: String) {
        match &self.health {
            Some(health) => {
                let alert = RaiseAlert {
                    component: component.to_string(),
                    message,
                };
                if let Err(e) = health.tell(alert).send().await {
                    tracing::error!(error = ?e, "Failed to deliver operator alert");
                }
            }
            None => {
                self.metrics.record_alert(component);
                tracing::error!(component = component, alert = %message, "Operator attention required");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{GetDlqMessages, GetSystemHealth, DlqMessages};
    use crate::domain::sale::{ProductId, Quantity};
    use crate::inventory::{InMemoryInventoryStore, MarkerPolicy};
    use crate::messaging::memory::RecordingProducer;
    use kameo::Actor;
    use std::time::Duration;

    struct Harness {
        store: InMemoryInventoryStore,
        ledger: Arc<StockLedger>,
        guard: Arc<IdempotencyGuard>,
        producer: Arc<RecordingProducer>,
        dlq: ActorRef<DlqActor>,
        health: ActorRef<HealthMonitorActor>,
        processor: SaleEventProcessor,
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn harness() -> Harness {
        let store = InMemoryInventoryStore::new();
        let shared: Arc<dyn crate::inventory::InventoryStore> = Arc::new(store.clone());
        let ledger = Arc::new(StockLedger::new(shared.clone()));
        let guard = Arc::new(IdempotencyGuard::new(shared, MarkerPolicy::default()));
        let metrics = Arc::new(Metrics::new().unwrap());
        let producer = Arc::new(RecordingProducer::new());

        let dlq = DlqActor::spawn(DlqActor::new(producer.clone(), "sales.dlq", fast_retry(), metrics.clone()));
        let health = HealthMonitorActor::spawn(HealthMonitorActor::new(metrics.clone()));

        let processor = SaleEventProcessor::new(ledger.clone(), guard.clone(), metrics)
            .with_dlq(dlq.clone())
            .with_health_monitor(health.clone())
            .with_retry_config(fast_retry());

        Harness { store, ledger, guard, producer, dlq, health, processor }
    }

    fn p(id: &str) -> ProductId {
        ProductId::parse(id).unwrap()
    }

    fn sale(product: &str, quantity: i64) -> SaleEvent {
        SaleEvent::new(p(product), Quantity::new(quantity).unwrap())
    }

    fn delivery_of(event: &SaleEvent, offset: i64) -> Delivery {
        Delivery {
            topic: "sales".into(),
            partition: 0,
            offset,
            key: Some(event.product_id.to_string()),
            payload: codec::encode(event).unwrap(),
        }
    }

    async fn dead_letters(h: &Harness) -> Vec<crate::actors::DeadLetter> {
        let DlqMessages(messages) = h.dlq.ask(GetDlqMessages { limit: 100 }).await.unwrap();
        messages
    }

    #[tokio::test]
    async fn test_sale_is_applied_once_and_redelivery_is_duplicate() {
        let h = harness();
        h.ledger.set_quantity(&p("P1"), 10).await.unwrap();
        let e1 = sale("P1", 3);

        let outcome = h.processor.process(&delivery_of(&e1, 0)).await;
        assert_eq!(outcome, Outcome::Applied { new_quantity: 7 });
        assert_eq!(outcome.disposition(), Disposition::Ack);
        assert_eq!(h.ledger.get_quantity(&p("P1")).await.unwrap(), 7);

        // the event is recorded: marking it again is refused
        assert!(!h.guard.try_mark_processed(e1.event_id).await.unwrap());

        let outcome = h.processor.process(&delivery_of(&e1, 1)).await;
        assert_eq!(outcome, Outcome::Duplicate);
        assert_eq!(h.ledger.get_quantity(&p("P1")).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_repeated_redelivery_decrements_once() {
        let h = harness();
        h.ledger.set_quantity(&p("P1"), 100).await.unwrap();
        let event = sale("P1", 4);

        for offset in 0..5 {
            h.processor.process(&delivery_of(&event, offset)).await;
        }

        assert_eq!(h.ledger.get_quantity(&p("P1")).await.unwrap(), 96);
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_dead_lettered_and_acked() {
        let h = harness();
        h.ledger.set_quantity(&p("P1"), 2).await.unwrap();
        let e2 = sale("P1", 5);

        let outcome = h.processor.process(&delivery_of(&e2, 0)).await;
        assert_eq!(outcome, Outcome::InsufficientStock);
        assert_eq!(outcome.disposition(), Disposition::Ack);
        assert_eq!(h.ledger.get_quantity(&p("P1")).await.unwrap(), 2);

        let letters = dead_letters(&h).await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::InsufficientStock);
        assert_eq!(letters[0].event_id, Some(e2.event_id));

        let health = h.health.ask(GetSystemHealth).await.unwrap();
        assert_eq!(health.alerts_raised, 1);

        // handled: redelivery does not dead-letter a second time
        assert_eq!(h.processor.process(&delivery_of(&e2, 1)).await, Outcome::Duplicate);
        assert_eq!(dead_letters(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected_without_mutation() {
        let h = harness();
        h.ledger.set_quantity(&p("P1"), 10).await.unwrap();

        let delivery = Delivery {
            topic: "sales".into(),
            partition: 0,
            offset: 0,
            key: None,
            payload: b"{not json".to_vec(),
        };

        let outcome = h.processor.process(&delivery).await;
        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(outcome.disposition(), Disposition::Ack);
        assert_eq!(h.ledger.get_quantity(&p("P1")).await.unwrap(), 10);

        let letters = dead_letters(&h).await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::Malformed);
        assert_eq!(letters[0].payload.as_deref(), Some("{not json"));
    }

    #[tokio::test]
    async fn test_store_outage_redelivers_then_applies() {
        let h = harness();
        h.ledger.set_quantity(&p("P1"), 10).await.unwrap();
        let event = sale("P1", 1);

        h.store.set_unavailable(true);
        let outcome = h.processor.process(&delivery_of(&event, 0)).await;
        assert_eq!(outcome, Outcome::Redeliver);
        assert_eq!(outcome.disposition(), Disposition::Redeliver);

        h.store.set_unavailable(false);
        assert_eq!(h.ledger.get_quantity(&p("P1")).await.unwrap(), 10);
        assert_eq!(
            h.processor.process(&delivery_of(&event, 0)).await,
            Outcome::Applied { new_quantity: 9 }
        );
    }

    #[tokio::test]
    async fn test_failed_apply_releases_claim() {
        let h = harness();
        h.ledger.set_quantity(&p("P1"), 10).await.unwrap();
        let event = sale("P1", 2);

        h.store.set_stock_writes_unavailable(true);
        assert_eq!(h.processor.process(&delivery_of(&event, 0)).await, Outcome::Redeliver);

        // no pending marker left behind: the redelivery is not blocked as in-flight
        h.store.set_stock_writes_unavailable(false);
        assert_eq!(
            h.processor.process(&delivery_of(&event, 0)).await,
            Outcome::Applied { new_quantity: 8 }
        );

        let health = h.health.ask(GetSystemHealth).await.unwrap();
        assert_eq!(health.alerts_raised, 1);
    }

    #[tokio::test]
    async fn test_unavailable_dlq_redelivers_rejected_message() {
        let h = harness();
        h.producer.set_failing(true);

        let delivery = Delivery {
            topic: "sales".into(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Vec::new(),
        };
        assert_eq!(h.processor.process(&delivery).await, Outcome::Redeliver);

        h.producer.set_failing(false);
        assert_eq!(h.processor.process(&delivery).await, Outcome::Rejected);
    }
}
