use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{ProductId, Quantity};

// ============================================================================
// Sale Event
// ============================================================================

/// One sale of `quantity` units of `product_id`.
///
/// Immutable once built. `event_id` identifies the logical sale and is the
/// deduplication key on the consumer side, so a redelivered message carries
/// the same id as the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleEvent {
    pub event_id: Uuid,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub timestamp: DateTime<Utc>,
}

impl SaleEvent {
    pub fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            product_id,
            quantity,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        "SaleRecorded"
    }
}
