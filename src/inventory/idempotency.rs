use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::store::{Claim, InventoryStore, MarkerPolicy, StoreError};

// ============================================================================
// Idempotency Guard
// ============================================================================
//
// Remembers which sale events were applied so redelivered messages become
// no-ops. Check-and-set is a single store operation; exactly one concurrent
// caller acquires a given event id.
//
// ============================================================================

pub struct IdempotencyGuard {
    store: Arc<dyn InventoryStore>,
    policy: MarkerPolicy,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn InventoryStore>, policy: MarkerPolicy) -> Self {
        Self { store, policy }
    }

    /// True (and the id is recorded for the retention window) if the event
    /// was not seen before; false with no side effect otherwise.
    pub async fn try_mark_processed(&self, event_id: Uuid) -> Result<bool, StoreError> {
        if self.claim(event_id).await? != Claim::Acquired {
            return Ok(false);
        }

        if let Err(e) = self.complete(event_id).await {
            if let Err(release_err) = self.release(event_id).await {
                tracing::warn!(event_id = %event_id, error = %release_err, "Failed to release claim after mark failure");
            }
            return Err(e);
        }

        Ok(true)
    }

    /// Leased claim for callers that apply the event themselves. Distinguishes
    /// an applied event from one another worker is still working on; a pending
    /// marker older than the lease can be taken over.
    pub async fn claim(&self, event_id: Uuid) -> Result<Claim, StoreError> {
        let claim = self.store.claim_event(event_id, self.policy).await?;
        tracing::debug!(event_id = %event_id, claim = ?claim, "Idempotency claim");
        Ok(claim)
    }

    /// Undo a claim whose apply failed transiently
    pub async fn release(&self, event_id: Uuid) -> Result<(), StoreError> {
        self.store.release_event(event_id).await
    }

    /// Record a claimed event as handled even though stock was not changed
    pub async fn complete(&self, event_id: Uuid) -> Result<(), StoreError> {
        self.store.complete_event(event_id, self.policy.retention).await
    }

    pub fn retention(&self) -> Duration {
        self.policy.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::store::InMemoryInventoryStore;

    fn guard() -> IdempotencyGuard {
        IdempotencyGuard::new(Arc::new(InMemoryInventoryStore::new()), MarkerPolicy::default())
    }

    #[tokio::test]
    async fn test_first_mark_wins() {
        let guard = guard();
        let event_id = Uuid::new_v4();

        assert!(guard.try_mark_processed(event_id).await.unwrap());
        assert!(!guard.try_mark_processed(event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_marked_event_outlives_pending_lease() {
        let guard = IdempotencyGuard::new(
            Arc::new(InMemoryInventoryStore::new()),
            MarkerPolicy {
                retention: Duration::from_secs(3600),
                pending_lease: Duration::from_millis(20),
            },
        );
        let event_id = Uuid::new_v4();

        assert!(guard.try_mark_processed(event_id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!guard.try_mark_processed(event_id).await.unwrap());
        assert_eq!(guard.claim(event_id).await.unwrap(), Claim::Duplicate);
    }

    #[tokio::test]
    async fn test_mark_does_not_steal_in_flight_claim() {
        let guard = guard();
        let event_id = Uuid::new_v4();

        assert_eq!(guard.claim(event_id).await.unwrap(), Claim::Acquired);
        assert!(!guard.try_mark_processed(event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_event_is_duplicate() {
        let guard = guard();
        let event_id = Uuid::new_v4();

        guard.claim(event_id).await.unwrap();
        guard.complete(event_id).await.unwrap();

        assert_eq!(guard.claim(event_id).await.unwrap(), Claim::Duplicate);
    }

    #[tokio::test]
    async fn test_released_event_can_be_claimed_again() {
        let guard = guard();
        let event_id = Uuid::new_v4();

        assert_eq!(guard.claim(event_id).await.unwrap(), Claim::Acquired);
        guard.release(event_id).await.unwrap();
        assert!(guard.try_mark_processed(event_id).await.unwrap());

        // release leaves a terminal marker alone
        guard.release(event_id).await.unwrap();
        assert!(!guard.try_mark_processed(event_id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_one_concurrent_caller_wins() {
        let guard = Arc::new(guard());
        let event_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move {
                guard.try_mark_processed(event_id).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
