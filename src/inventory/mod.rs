// ============================================================================
// Inventory - stock accounting and event deduplication
// ============================================================================
//
// - store/       - persistent store interface (in-memory, Redis)
// - ledger       - StockLedger (product → available quantity)
// - idempotency  - IdempotencyGuard (processed event ids)
//
// Both the ledger and the guard share one store instance.
//
// ============================================================================

pub mod store;
pub mod ledger;
pub mod idempotency;

pub use store::{Claim, InMemoryInventoryStore, InventoryStore, MarkerPolicy, RedisInventoryStore, StoreError};
pub use ledger::{LedgerError, StockLedger};
pub use idempotency::IdempotencyGuard;
