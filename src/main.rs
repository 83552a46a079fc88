use kameo::Actor;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod config;
mod domain;
mod http;
mod inventory;
mod messaging;
mod metrics;
mod processing;
mod publisher;
mod utils;

use actors::{DlqActor, HealthMonitorActor, HealthStatus, UpdateHealth};
use config::AppConfig;
use inventory::{IdempotencyGuard, InMemoryInventoryStore, InventoryStore, RedisInventoryStore, StockLedger};
use messaging::{EventProducer, MessageStream, RedpandaClient, RedpandaConsumer};
use processing::{SaleEventProcessor, WorkerPool};
use publisher::SalePublisher;
use utils::{retry_with_backoff, CircuitBreaker, CircuitState, RetryConfig};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn InventoryStore>> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis...");
            let store = retry_with_backoff("redis_connect", RetryConfig::aggressive(), |_attempt| {
                RedisInventoryStore::connect(url)
            })
            .await
            .into_result()?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-memory inventory store (state is lost on restart)");
            Ok(Arc::new(InMemoryInventoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,inventory_stream=debug"))
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!(
        brokers = %config.kafka_brokers,
        topic = %config.sales_topic,
        dlq_topic = %config.dlq_topic,
        group = %config.consumer_group,
        workers = config.worker_count,
        "Starting inventory stream"
    );

    // === 1. Prometheus metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Inventory store, ledger and idempotency guard (one shared store) ===
    let store = open_store(&config).await?;
    let ledger = Arc::new(StockLedger::new(store.clone()));
    let guard = Arc::new(IdempotencyGuard::new(store, config.marker_policy()));

    // === 3. Redpanda producer (with circuit breaker feeding metrics) ===
    let breaker_metrics = metrics.clone();
    let breaker = CircuitBreaker::new("redpanda", RedpandaClient::default_breaker_config())
        .with_listener(Arc::new(move |from: CircuitState, to: CircuitState| {
            breaker_metrics.record_circuit_breaker_transition(from.as_str(), to.as_str());
            breaker_metrics.update_circuit_breaker_state(to.as_gauge());
        }));
    let redpanda = Arc::new(RedpandaClient::new(&config.kafka_brokers, breaker)?);
    let producer: Arc<dyn EventProducer> = redpanda.clone();

    // === 4. Infrastructure actors ===
    let dlq = DlqActor::spawn(DlqActor::new(
        producer.clone(),
        config.dlq_topic.clone(),
        RetryConfig::aggressive(),
        metrics.clone(),
    ));
    let health = HealthMonitorActor::spawn(
        HealthMonitorActor::new(metrics.clone()).with_producer_breaker(redpanda.circuit_breaker()),
    );
    let store_kind = if config.redis_url.is_some() { "redis" } else { "in-memory" };
    let _ = health
        .tell(UpdateHealth {
            component: "store".to_string(),
            status: HealthStatus::Healthy,
            details: Some(store_kind.to_string()),
        })
        .send()
        .await;

    // === 5. Consumer side: processor + worker pool ===
    let processor = Arc::new(
        SaleEventProcessor::new(ledger.clone(), guard, metrics.clone())
            .with_dlq(dlq.clone())
            .with_health_monitor(health.clone()),
    );
    let consumer: Arc<dyn MessageStream> = Arc::new(RedpandaConsumer::new(
        &config.kafka_brokers,
        &config.consumer_group,
        &[config.sales_topic.as_str()],
    )?);
    let pool = WorkerPool::start(consumer, processor, config.worker_pool(), metrics.clone());

    // === 6. Producer side: publisher + HTTP ===
    let publisher = Arc::new(
        SalePublisher::new(producer, config.sales_topic.clone(), metrics.clone())
            .with_retry_config(RetryConfig::conservative()),
    );
    let server = http::spawn_http_server(
        http::AppState {
            publisher,
            ledger,
            metrics,
            dlq: Some(dlq.clone()),
            health: Some(health.clone()),
        },
        config.http_host.clone(),
        config.http_port,
    )
    .await?;

    tracing::info!("Inventory stream running on http://{}", config.http_addr());

    // === 7. Graceful shutdown ===
    shutdown_signal().await;

    server.stop(true).await;
    tracing::info!("HTTP server stopped");

    pool.shutdown().await;

    let _ = dlq.stop_gracefully().await;
    let _ = health.stop_gracefully().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
