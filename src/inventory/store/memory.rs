use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::sale::ProductId;
use super::{Claim, InventoryStore, MarkerPolicy, StoreError};

// ============================================================================
// In-Memory Inventory Store
// ============================================================================
//
// Single-process store used for local runs and tests. One mutex covers both
// key spaces, so a stock write and its marker flip are trivially atomic.
// Markers expire after their retention; the set is additionally capped by
// count, evicting the oldest markers first.
//
// ============================================================================

const DEFAULT_MAX_MARKERS: usize = 100_000;

#[derive(Debug, Clone, Copy)]
enum Marker {
    Pending { claimed_at: Instant },
    Applied,
}

#[derive(Debug)]
struct MarkerEntry {
    marker: Marker,
    expires_at: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    stock: HashMap<ProductId, i64>,
    markers: HashMap<Uuid, MarkerEntry>,
    // (event_id, generation) in write order; stale generations are skipped
    marker_order: VecDeque<(Uuid, u64)>,
    next_generation: u64,
}

impl MemoryState {
    fn write_marker(&mut self, event_id: Uuid, marker: Marker, ttl: Duration, now: Instant) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.markers.insert(
            event_id,
            MarkerEntry {
                marker,
                expires_at: now + ttl,
                generation,
            },
        );
        self.marker_order.push_back((event_id, generation));
    }

    fn purge(&mut self, now: Instant, max_markers: usize) {
        while let Some(&(event_id, generation)) = self.marker_order.front() {
            let evict = match self.markers.get(&event_id) {
                Some(entry) if entry.generation == generation => {
                    entry.expires_at <= now || self.markers.len() > max_markers
                }
                // superseded by a later write or already removed
                _ => {
                    self.marker_order.pop_front();
                    continue;
                }
            };

            if !evict {
                break;
            }

            self.markers.remove(&event_id);
            self.marker_order.pop_front();
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<MemoryState>>,
    max_markers: usize,
    unavailable: Arc<AtomicBool>,
    stock_writes_unavailable: Arc<AtomicBool>,
    stock_write_delay_ms: Arc<AtomicU64>,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::with_max_markers(DEFAULT_MAX_MARKERS)
    }

    pub fn with_max_markers(max_markers: usize) -> Self {
        Self {
            state: Arc::default(),
            max_markers: max_markers.max(1),
            unavailable: Arc::default(),
            stock_writes_unavailable: Arc::default(),
            stock_write_delay_ms: Arc::default(),
        }
    }

    #[cfg(test)]
    /// Make every operation fail with `StoreError::Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[cfg(test)]
    /// Fail only stock compare-and-swap writes; reads and markers keep working.
    pub fn set_stock_writes_unavailable(&self, unavailable: bool) {
        self.stock_writes_unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[cfg(test)]
    /// Stall every stock compare-and-swap for `delay` before it runs.
    pub fn set_stock_write_delay(&self, delay: Duration) {
        self.stock_write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn marker_count(&self) -> usize {
        self.lock().markers.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn load_stock(&self, product_id: &ProductId) -> Result<Option<i64>, StoreError> {
        self.check_available()?;
        Ok(self.lock().stock.get(product_id).copied())
    }

    async fn compare_and_swap_stock(
        &self,
        product_id: &ProductId,
        expected: Option<i64>,
        new: i64,
        applied_event: Option<Uuid>,
        retention: Duration,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let delay_ms = self.stock_write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.stock_writes_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("stock writes marked unavailable".to_string()));
        }
        let mut state = self.lock();

        if state.stock.get(product_id).copied() != expected {
            return Ok(false);
        }

        state.stock.insert(product_id.clone(), new);
        if let Some(event_id) = applied_event {
            state.write_marker(event_id, Marker::Applied, retention, Instant::now());
        }

        Ok(true)
    }

    async fn claim_event(&self, event_id: Uuid, policy: MarkerPolicy) -> Result<Claim, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.lock();
        state.purge(now, self.max_markers);

        let claim = match state.markers.get(&event_id).map(|entry| entry.marker) {
            None => Claim::Acquired,
            Some(Marker::Applied) => Claim::Duplicate,
            Some(Marker::Pending { claimed_at }) => {
                if now.duration_since(claimed_at) >= policy.pending_lease {
                    tracing::warn!(event_id = %event_id, "Taking over stale pending claim");
                    Claim::Acquired
                } else {
                    Claim::InFlight
                }
            }
        };

        if claim == Claim::Acquired {
            state.write_marker(event_id, Marker::Pending { claimed_at: now }, policy.retention, now);
        }

        Ok(claim)
    }

    async fn complete_event(&self, event_id: Uuid, retention: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock().write_marker(event_id, Marker::Applied, retention, Instant::now());
        Ok(())
    }

    async fn release_event(&self, event_id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.lock();
        let pending = matches!(
            state.markers.get(&event_id).map(|entry| entry.marker),
            Some(Marker::Pending { .. })
        );
        if pending {
            state.markers.remove(&event_id);
        }
        Ok(())
    }
}
