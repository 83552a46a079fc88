use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::sale::{DecodeError, ProductId, Quantity, SaleEvent};

// ============================================================================
// Sale Event Codec
// ============================================================================
//
// Wire format is a JSON object with a fixed field order:
//
//   {"event_id":"<uuid>","product_id":"P1","quantity":3,
//    "timestamp":"2024-05-01T10:00:00.123456789Z"}
//
// Timestamps keep nanosecond precision so decode(encode(e)) == e.
// Unknown fields are ignored on decode.
//
// ============================================================================

pub fn encode(event: &SaleEvent) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(event)
}

pub fn decode(payload: &[u8]) -> Result<SaleEvent, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::EmptyPayload);
    }

    let raw: RawSaleEvent =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let event_id = raw.event_id.ok_or(DecodeError::MissingField("event_id"))?;
    let product_id = raw.product_id.ok_or(DecodeError::MissingField("product_id"))?;
    let quantity = raw.quantity.ok_or(DecodeError::MissingField("quantity"))?;
    let timestamp = raw.timestamp.ok_or(DecodeError::MissingField("timestamp"))?;

    Ok(SaleEvent {
        event_id,
        product_id: ProductId::parse(product_id)?,
        quantity: Quantity::new(quantity)?,
        timestamp,
    })
}

/// Lenient mirror of `SaleEvent` so missing fields and bad values map to
/// precise `DecodeError`s instead of one opaque serde message.
#[derive(Deserialize)]
struct RawSaleEvent {
    event_id: Option<Uuid>,
    product_id: Option<String>,
    quantity: Option<i64>,
    timestamp: Option<DateTime<Utc>>,
}
