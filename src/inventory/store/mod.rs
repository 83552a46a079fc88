use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::sale::ProductId;
use crate::utils::IsTransient;

mod memory;
mod redis_store;

pub use memory::InMemoryInventoryStore;
pub use redis_store::RedisInventoryStore;

// ============================================================================
// Inventory Store - narrow interface to the persistent key-value store
// ============================================================================
//
// Two key spaces:
//   stock:<product_id>      → available quantity
//   processed:<event_id>    → pending (claimed, not yet applied) | applied
//
// A stock write may carry the event id that caused it; the store then flips
// that event's marker to `applied` in the same atomic operation. This is what
// keeps the ledger and the idempotency set consistent without a distributed
// transaction: a crash between claim and apply leaves a pending marker that
// can be reclaimed once its lease expires, and a crash after apply leaves an
// applied marker.
//
// ============================================================================

/// Outcome of claiming an event id for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// No live marker existed (or a stale pending one was taken over)
    Acquired,
    /// The event was already applied within the retention window
    Duplicate,
    /// Another worker holds a fresh pending marker
    InFlight,
}

/// Lifetimes of processed-event markers
#[derive(Debug, Clone, Copy)]
pub struct MarkerPolicy {
    /// How long an applied marker is remembered
    pub retention: Duration,
    /// How long a pending marker blocks other claimants
    pub pending_lease: Duration,
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            pending_lease: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Current quantity, `None` if the product was never written
    async fn load_stock(&self, product_id: &ProductId) -> Result<Option<i64>, StoreError>;

    /// Write `new` only if the stored value still equals `expected`.
    /// When `applied_event` is set, its marker becomes `applied` atomically
    /// with the write and is kept for `retention`.
    async fn compare_and_swap_stock(
        &self,
        product_id: &ProductId,
        expected: Option<i64>,
        new: i64,
        applied_event: Option<Uuid>,
        retention: Duration,
    ) -> Result<bool, StoreError>;

    async fn claim_event(&self, event_id: Uuid, policy: MarkerPolicy) -> Result<Claim, StoreError>;

    /// Mark an event terminally handled without touching stock
    async fn complete_event(&self, event_id: Uuid, retention: Duration) -> Result<(), StoreError>;

    /// Drop a pending marker so a redelivery can claim the event again.
    /// Applied markers are left alone.
    async fn release_event(&self, event_id: Uuid) -> Result<(), StoreError>;
}

pub(crate) fn stock_key(product_id: &ProductId) -> String {
    format!("inventory:stock:{}", product_id)
}

pub(crate) fn processed_key(event_id: Uuid) -> String {
    format!("inventory:processed:{}", event_id)
}
