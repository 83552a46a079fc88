//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::inventory::MarkerPolicy;
use crate::processing::WorkerPoolConfig;

/// Runtime configuration with defaults for a local single-broker setup.
///
/// Reads from environment variables:
/// - `KAFKA_BROKERS`: bootstrap servers (default: `"127.0.0.1:9092"`)
/// - `SALES_TOPIC`: sale event topic (default: `"estoque-topico"`)
/// - `DLQ_TOPIC`: dead-letter topic (default: `"estoque-topico.dlq"`)
/// - `CONSUMER_GROUP`: consumer group id (default: `"estoque-group"`)
/// - `REDIS_URL`: Redis connection URL; unset uses the in-memory store
/// - `HTTP_HOST` / `HTTP_PORT`: bind address (default: `"0.0.0.0"` / `8080`)
/// - `WORKER_COUNT`: consumer workers (default: `4`)
/// - `IDEMPOTENCY_RETENTION_SECS`: processed-event memory (default: `86400`)
/// - `PENDING_LEASE_SECS`: claim lease before takeover (default: `30`)
/// - `SHUTDOWN_TIMEOUT_SECS`: worker drain bound (default: `10`)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub kafka_brokers: String,
    pub sales_topic: String,
    pub dlq_topic: String,
    pub consumer_group: String,
    pub redis_url: Option<String>,
    pub http_host: String,
    pub http_port: u16,
    pub worker_count: usize,
    pub idempotency_retention: Duration,
    pub pending_lease: Duration,
    pub shutdown_timeout: Duration,
}

impl AppConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    /// Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default)
        };

        Self {
            kafka_brokers: text("KAFKA_BROKERS", defaults.kafka_brokers),
            sales_topic: text("SALES_TOPIC", defaults.sales_topic),
            dlq_topic: text("DLQ_TOPIC", defaults.dlq_topic),
            consumer_group: text("CONSUMER_GROUP", defaults.consumer_group),
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            http_host: text("HTTP_HOST", defaults.http_host),
            http_port: parse_var(&lookup, "HTTP_PORT").unwrap_or(defaults.http_port),
            worker_count: parse_var(&lookup, "WORKER_COUNT")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.worker_count),
            idempotency_retention: parse_var(&lookup, "IDEMPOTENCY_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idempotency_retention),
            pending_lease: parse_var(&lookup, "PENDING_LEASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.pending_lease),
            shutdown_timeout: parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn marker_policy(&self) -> MarkerPolicy {
        MarkerPolicy {
            retention: self.idempotency_retention,
            pending_lease: self.pending_lease,
        }
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: self.worker_count,
            shutdown_timeout: self.shutdown_timeout,
            ..WorkerPoolConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            kafka_brokers: "127.0.0.1:9092".to_string(),
            sales_topic: "estoque-topico".to_string(),
            dlq_topic: "estoque-topico.dlq".to_string(),
            consumer_group: "estoque-group".to_string(),
            redis_url: None,
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            worker_count: 4,
            idempotency_retention: Duration::from_secs(24 * 60 * 60),
            pending_lease: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}
