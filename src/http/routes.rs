use actix_web::{web, HttpResponse, Responder};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::actors::{DlqMessages, GetDlqMessages, GetDlqStats, GetSystemHealth};
use crate::domain::sale::ProductId;
use crate::inventory::LedgerError;
use crate::publisher::PublishError;
use crate::utils::IsTransient;
use super::AppState;

const DEFAULT_DLQ_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SaleRequest {
    pub product_id: String,
    /// One unit when omitted
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StockResponse<'a> {
    product_id: &'a str,
    quantity: i64,
}

fn error_body(message: impl ToString) -> serde_json::Value {
    json!({ "error": message.to_string() })
}

fn parse_product(raw: &str) -> Result<ProductId, HttpResponse> {
    ProductId::parse(raw).map_err(|e| HttpResponse::BadRequest().json(error_body(e)))
}

fn ledger_error_response(error: &LedgerError) -> HttpResponse {
    match error {
        LedgerError::InsufficientStock { .. } => HttpResponse::Conflict().json(error_body(error)),
        LedgerError::NegativeQuantity(_) | LedgerError::Overflow { .. } => {
            HttpResponse::BadRequest().json(error_body(error))
        }
        e if e.is_transient() => HttpResponse::ServiceUnavailable().json(error_body(error)),
        _ => HttpResponse::InternalServerError().json(error_body(error)),
    }
}

/// POST /sales
pub async fn create_sale(state: web::Data<AppState>, body: web::Json<SaleRequest>) -> impl Responder {
    let quantity = body.quantity.unwrap_or(1);

    match state.publisher.publish_sale(&body.product_id, quantity).await {
        Ok(event_id) => HttpResponse::Accepted().json(json!({ "event_id": event_id })),
        Err(e @ PublishError::Validation(_)) => HttpResponse::BadRequest().json(error_body(e)),
        Err(e @ PublishError::Unavailable(_)) => HttpResponse::ServiceUnavailable().json(error_body(e)),
        Err(e @ PublishError::Encoding(_)) => HttpResponse::InternalServerError().json(error_body(e)),
    }
}

/// GET /stock/{product_id}
pub async fn get_stock(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let product_id = match parse_product(&path) {
        Ok(product_id) => product_id,
        Err(response) => return response,
    };

    match state.ledger.get_quantity(&product_id).await {
        Ok(quantity) => HttpResponse::Ok().json(StockResponse {
            product_id: product_id.as_str(),
            quantity,
        }),
        Err(e) => ledger_error_response(&e),
    }
}

/// PUT /stock/{product_id}
pub async fn set_stock(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetStockRequest>,
) -> impl Responder {
    let product_id = match parse_product(&path) {
        Ok(product_id) => product_id,
        Err(response) => return response,
    };

    match state.ledger.set_quantity(&product_id, body.quantity).await {
        Ok(()) => HttpResponse::Ok().json(StockResponse {
            product_id: product_id.as_str(),
            quantity: body.quantity,
        }),
        Err(e) => ledger_error_response(&e),
    }
}

/// POST /stock/{product_id}/adjust
pub async fn adjust_stock(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AdjustStockRequest>,
) -> impl Responder {
    let product_id = match parse_product(&path) {
        Ok(product_id) => product_id,
        Err(response) => return response,
    };

    match state.ledger.apply_delta(&product_id, body.delta).await {
        Ok(quantity) => HttpResponse::Ok().json(StockResponse {
            product_id: product_id.as_str(),
            quantity,
        }),
        Err(e) => ledger_error_response(&e),
    }
}

/// GET /dlq
pub async fn list_dead_letters(state: web::Data<AppState>, query: web::Query<DlqQuery>) -> impl Responder {
    let Some(dlq) = &state.dlq else {
        return HttpResponse::ServiceUnavailable().json(error_body("dead letter queue not running"));
    };

    let limit = query.limit.unwrap_or(DEFAULT_DLQ_LIMIT);
    let messages = dlq.ask(GetDlqMessages { limit }).await;
    let stats = dlq.ask(GetDlqStats).await;

    match (messages, stats) {
        (Ok(DlqMessages(messages)), Ok(stats)) => {
            HttpResponse::Ok().json(json!({ "stats": stats, "messages": messages }))
        }
        _ => HttpResponse::ServiceUnavailable().json(error_body("dead letter queue not responding")),
    }
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    let Some(monitor) = &state.health else {
        return HttpResponse::Ok().json(json!({ "status": "healthy", "service": "inventory-stream" }));
    };

    match monitor.ask(GetSystemHealth).await {
        Ok(health) => {
            let body = json!({
                "status": health.overall_status,
                "reason": health.overall_status.reason(),
                "service": "inventory-stream",
                "components": health.components,
                "alerts_raised": health.alerts_raised,
                "check_time": health.check_time,
            });
            if health.overall_status.is_unhealthy() {
                HttpResponse::ServiceUnavailable().json(body)
            } else {
                HttpResponse::Ok().json(body)
            }
        }
        Err(_) => HttpResponse::ServiceUnavailable().json(error_body("health monitor not responding")),
    }
}

/// GET /metrics
pub async fn metrics(state: web::Data<AppState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(e.to_string());
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}
