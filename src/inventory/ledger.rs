use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::domain::sale::{ProductId, SaleEvent};
use crate::utils::IsTransient;
use super::store::{InventoryStore, StoreError};

// ============================================================================
// Stock Ledger
// ============================================================================
//
// Owns the product → available quantity mapping. Every mutation goes through
// `apply`, which:
//   1. takes the per-product async lock (serializes writers in this process)
//   2. reads the current quantity
//   3. rejects the delta if the result would be negative
//   4. compare-and-swaps the new value (serializes writers across processes)
//
// Products never written read as 0. Different products never share a lock.
// A product's lock entry lives only while some writer holds or awaits it.
//
// ============================================================================

const MAX_CAS_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    #[error("quantity for {product_id} would overflow")]
    Overflow { product_id: ProductId },

    #[error("stock quantity must not be negative, got {0}")]
    NegativeQuantity(i64),

    #[error("gave up on {product_id} after {attempts} conflicting writes")]
    Contention { product_id: ProductId, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IsTransient for LedgerError {
    fn is_transient(&self) -> bool {
        match self {
            LedgerError::Contention { .. } => true,
            LedgerError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

type LockMap = Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a product's write lock; drops the map entry when no one else wants it.
struct ProductLock<'a> {
    locks: &'a LockMap,
    product_id: ProductId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProductLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        // clones are only handed out under the map lock, so a count of 1 means no waiters
        if locks
            .get(&self.product_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&self.product_id);
        }
    }
}

pub struct StockLedger {
    store: Arc<dyn InventoryStore>,
    locks: LockMap,
}

impl StockLedger {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Available quantity; 0 for products never stocked
    pub async fn get_quantity(&self, product_id: &ProductId) -> Result<i64, LedgerError> {
        Ok(self.store.load_stock(product_id).await?.unwrap_or(0))
    }

    /// Add `delta` (negative for sales) and return the new quantity.
    /// Fails without side effects if the result would drop below zero.
    pub async fn apply_delta(&self, product_id: &ProductId, delta: i64) -> Result<i64, LedgerError> {
        self.apply(product_id, delta, None, Duration::ZERO).await
    }

    /// Apply a sale and mark its event applied in the same store write.
    pub async fn apply_sale(&self, event: &SaleEvent, marker_retention: Duration) -> Result<i64, LedgerError> {
        self.apply(
            &event.product_id,
            event.quantity.as_sale_delta(),
            Some(event.event_id),
            marker_retention,
        )
        .await
    }

    /// Overwrite the quantity (restock or inventory count)
    pub async fn set_quantity(&self, product_id: &ProductId, quantity: i64) -> Result<(), LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::NegativeQuantity(quantity));
        }

        let _lock = self.lock_product(product_id).await;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.load_stock(product_id).await?;
            if self
                .store
                .compare_and_swap_stock(product_id, current, quantity, None, Duration::ZERO)
                .await?
            {
                tracing::info!(product_id = %product_id, quantity = quantity, "Stock level set");
                return Ok(());
            }
        }

        Err(LedgerError::Contention {
            product_id: product_id.clone(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn apply(
        &self,
        product_id: &ProductId,
        delta: i64,
        applied_event: Option<Uuid>,
        marker_retention: Duration,
    ) -> Result<i64, LedgerError> {
        let _lock = self.lock_product(product_id).await;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.store.load_stock(product_id).await?;
            let available = current.unwrap_or(0);

            let new_quantity = available
                .checked_add(delta)
                .ok_or_else(|| LedgerError::Overflow { product_id: product_id.clone() })?;

            if new_quantity < 0 {
                return Err(LedgerError::InsufficientStock {
                    product_id: product_id.clone(),
                    available,
                    requested: -delta,
                });
            }

            let swapped = self
                .store
                .compare_and_swap_stock(product_id, current, new_quantity, applied_event, marker_retention)
                .await?;

            if swapped {
                tracing::debug!(
                    product_id = %product_id,
                    delta = delta,
                    new_quantity = new_quantity,
                    "Stock delta applied"
                );
                return Ok(new_quantity);
            }

            tracing::debug!(
                product_id = %product_id,
                attempt = attempt,
                "Concurrent stock write detected, re-reading"
            );
        }

        Err(LedgerError::Contention {
            product_id: product_id.clone(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    async fn lock_product(&self, product_id: &ProductId) -> ProductLock<'_> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(product_id.clone()).or_default().clone()
        };

        let mut lock = ProductLock {
            locks: &self.locks,
            product_id: product_id.clone(),
            guard: None,
        };
        lock.guard = Some(mutex.lock_owned().await);
        lock
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
