use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::messaging::{Delivery, MessageStream, StreamError};
use crate::metrics::Metrics;
use crate::utils::RetryConfig;
use super::processor::{Disposition, SaleEventProcessor};

// ============================================================================
// Worker Pool
// ============================================================================
//
// One poller reads the stream and routes each delivery to worker
// `partition mod N`, so a partition is always handled by the same worker, in
// order, and its offsets are committed monotonically.
//
// A delivery that must be redelivered is rewound on the stream. Until it
// comes back, the worker skips later offsets of that partition that were
// already fetched; the stream hands those out again after the rewound one.
//
// Shutdown: the poller stops, workers drain what is queued, and whatever has
// not finished within `shutdown_timeout` is aborted. Uncommitted messages are
// redelivered on the next start.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    /// Per-worker queue depth
    pub queue_capacity: usize,
    /// Pause before rewinding a partition after a failed delivery
    pub redelivery_delay: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
            redelivery_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    poller: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    pub fn start(
        stream: Arc<dyn MessageStream>,
        processor: Arc<SaleEventProcessor>,
        config: WorkerPoolConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let worker_count = config.worker_count.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(
                id,
                rx,
                stream.clone(),
                processor.clone(),
                metrics.clone(),
                config.redelivery_delay,
                shutdown_rx.clone(),
            )));
        }

        let poller = tokio::spawn(run_poller(stream, senders, shutdown_rx));

        tracing::info!(workers = worker_count, "Worker pool started");

        Self {
            shutdown_tx,
            poller,
            workers,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Stop polling, drain the worker queues and wait (bounded) for workers.
    pub async fn shutdown(self) {
        tracing::info!("Stopping worker pool");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.poller.await {
            tracing::error!(error = %e, "Poller task failed");
        }

        let abort_handles: Vec<_> = self.workers.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(self.shutdown_timeout, join_all(self.workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Worker task failed");
                    }
                }
                tracing::info!("Worker pool drained");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Workers did not drain in time, aborting"
                );
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }
    }
}

fn worker_for(partition: i32, worker_count: usize) -> usize {
    partition.rem_euclid(worker_count as i32) as usize
}

async fn run_poller(
    stream: Arc<dyn MessageStream>,
    senders: Vec<mpsc::Sender<Delivery>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let backoff = RetryConfig::default();
    let mut consecutive_errors = 0;

    loop {
        let next = tokio::select! {
            _ = shutdown_rx.changed() => break,
            next = stream.next_delivery() => next,
        };

        let delivery = match next {
            Ok(delivery) => {
                consecutive_errors = 0;
                delivery
            }
            Err(StreamError::Closed) => {
                tracing::info!("Stream closed, poller exiting");
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                let delay = backoff.delay_after(consecutive_errors);
                tracing::warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Failed to receive from stream"
                );
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        let worker = worker_for(delivery.partition, senders.len());
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            sent = senders[worker].send(delivery) => {
                if sent.is_err() {
                    tracing::error!(worker = worker, "Worker queue closed, poller exiting");
                    break;
                }
            }
        }
    }

    tracing::info!("Poller stopped");
    // dropping the senders lets the workers drain and exit
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<Delivery>,
    stream: Arc<dyn MessageStream>,
    processor: Arc<SaleEventProcessor>,
    metrics: Arc<Metrics>,
    redelivery_delay: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    // partition → offset rewound and not yet seen again
    let mut awaiting: HashMap<i32, i64> = HashMap::new();

    while let Some(delivery) = rx.recv().await {
        if let Some(&rewound) = awaiting.get(&delivery.partition) {
            if delivery.offset > rewound {
                tracing::trace!(
                    worker = id,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    rewound = rewound,
                    "Skipping message fetched before rewind"
                );
                continue;
            }
            awaiting.remove(&delivery.partition);
        }

        metrics.messages_in_flight.inc();
        let outcome = processor.process(&delivery).await;
        metrics.messages_in_flight.dec();

        match outcome.disposition() {
            Disposition::Ack => match stream.commit(&delivery) {
                Ok(()) => metrics.offsets_committed.inc(),
                Err(e) => {
                    // a later commit on this partition covers it
                    tracing::warn!(worker = id, error = %e, "Offset commit failed");
                }
            },
            Disposition::Redeliver => {
                awaiting.insert(delivery.partition, delivery.offset);

                if *shutdown_rx.borrow() {
                    tracing::info!(
                        worker = id,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Shutting down, leaving message for the next start"
                    );
                    continue;
                }

                tokio::time::sleep(redelivery_delay).await;
                match stream.rewind(&delivery).await {
                    Ok(()) => {
                        metrics.partition_rewinds.inc();
                        tracing::warn!(
                            worker = id,
                            partition = delivery.partition,
                            offset = delivery.offset,
                            "Partition rewound for redelivery"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            worker = id,
                            error = %e,
                            "Rewind failed, partition paused until rebalance or restart"
                        );
                    }
                }
            }
        }
    }

    tracing::debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sale::{ProductId, Quantity, SaleEvent};
    use crate::inventory::{IdempotencyGuard, InMemoryInventoryStore, InventoryStore, MarkerPolicy, StockLedger};
    use crate::messaging::codec;
    use crate::messaging::memory::InMemoryStream;

    fn p(id: &str) -> ProductId {
        ProductId::parse(id).unwrap()
    }

    fn sale_payload(product: &str, quantity: i64) -> Vec<u8> {
        codec::encode(&SaleEvent::new(p(product), Quantity::new(quantity).unwrap())).unwrap()
    }

    fn test_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: 2,
            queue_capacity: 8,
            redelivery_delay: Duration::from_millis(5),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    fn setup() -> (InMemoryInventoryStore, Arc<StockLedger>, Arc<SaleEventProcessor>, Arc<Metrics>) {
        let store = InMemoryInventoryStore::new();
        let shared: Arc<dyn InventoryStore> = Arc::new(store.clone());
        let ledger = Arc::new(StockLedger::new(shared.clone()));
        let guard = Arc::new(IdempotencyGuard::new(shared, MarkerPolicy::default()));
        let metrics = Arc::new(Metrics::new().unwrap());
        let processor = Arc::new(
            SaleEventProcessor::new(ledger.clone(), guard, metrics.clone()).with_retry_config(RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
            }),
        );
        (store, ledger, processor, metrics)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_partitions_map_to_stable_workers() {
        assert_eq!(worker_for(0, 4), 0);
        assert_eq!(worker_for(5, 4), 1);
        assert_eq!(worker_for(5, 4), worker_for(5, 4));
        assert_eq!(worker_for(-3, 4), 1);
    }

    #[tokio::test]
    async fn test_pool_applies_and_commits_every_message() {
        let (_store, ledger, processor, metrics) = setup();
        ledger.set_quantity(&p("A"), 10).await.unwrap();
        ledger.set_quantity(&p("B"), 10).await.unwrap();

        let stream = Arc::new(InMemoryStream::new());
        for _ in 0..3 {
            stream.push(0, sale_payload("A", 1));
            stream.push(1, sale_payload("B", 2));
        }

        let pool = WorkerPool::start(stream.clone(), processor, test_config(), metrics.clone());
        wait_for(|| stream.commits().len() == 6).await;
        pool.shutdown().await;

        assert_eq!(ledger.get_quantity(&p("A")).await.unwrap(), 7);
        assert_eq!(ledger.get_quantity(&p("B")).await.unwrap(), 4);
        assert_eq!(metrics.offsets_committed.get(), 6);

        // commits per partition are in offset order
        for partition in [0, 1] {
            let offsets: Vec<i64> = stream
                .commits()
                .iter()
                .filter(|d| d.partition == partition)
                .map(|d| d.offset)
                .collect();
            assert_eq!(offsets, vec![0, 1, 2]);
        }
    }

    #[tokio::test]
    async fn test_failed_message_is_rewound_and_applied_once() {
        let (store, ledger, processor, metrics) = setup();
        ledger.set_quantity(&p("A"), 10).await.unwrap();

        store.set_unavailable(true);
        let stream = Arc::new(InMemoryStream::new());
        stream.push(0, sale_payload("A", 3));
        stream.push(0, sale_payload("A", 1));

        let pool = WorkerPool::start(stream.clone(), processor, test_config(), metrics.clone());
        wait_for(|| !stream.rewinds().is_empty()).await;
        assert!(stream.commits().is_empty());

        store.set_unavailable(false);
        wait_for(|| stream.commits().len() == 2).await;
        pool.shutdown().await;

        assert_eq!(ledger.get_quantity(&p("A")).await.unwrap(), 6);
        let offsets: Vec<i64> = stream.commits().iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 1]);
        assert!(metrics.partition_rewinds.get() >= 1);
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_block_partition() {
        let (_store, ledger, processor, metrics) = setup();
        ledger.set_quantity(&p("A"), 5).await.unwrap();

        let stream = Arc::new(InMemoryStream::new());
        stream.push(0, b"garbage".to_vec());
        stream.push(0, sale_payload("A", 5));

        let pool = WorkerPool::start(stream.clone(), processor, test_config(), metrics);
        wait_for(|| stream.commits().len() == 2).await;
        pool.shutdown().await;

        assert_eq!(ledger.get_quantity(&p("A")).await.unwrap(), 0);
        assert!(stream.rewinds().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_returns_with_idle_stream() {
        let (_store, _ledger, processor, metrics) = setup();
        let stream = Arc::new(InMemoryStream::new());

        let pool = WorkerPool::start(stream, processor, test_config(), metrics);
        tokio::time::timeout(Duration::from_secs(3), pool.shutdown())
            .await
            .expect("shutdown hung");
    }

    #[tokio::test]
    async fn test_stuck_worker_is_aborted_after_timeout() {
        let (store, ledger, processor, metrics) = setup();
        ledger.set_quantity(&p("A"), 10).await.unwrap();
        store.set_stock_write_delay(Duration::from_secs(30));

        let stream = Arc::new(InMemoryStream::new());
        stream.push(0, sale_payload("A", 1));

        let config = WorkerPoolConfig {
            shutdown_timeout: Duration::from_millis(10),
            ..test_config()
        };
        let pool = WorkerPool::start(stream.clone(), processor, config, metrics.clone());
        wait_for(|| metrics.messages_in_flight.get() == 1).await;

        tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
            .await
            .expect("shutdown did not honour its timeout");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(stream.commits().is_empty());
        store.set_stock_write_delay(Duration::ZERO);
        assert_eq!(ledger.get_quantity(&p("A")).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_queued_messages_drain_on_shutdown() {
        let (store, ledger, processor, metrics) = setup();
        ledger.set_quantity(&p("A"), 10).await.unwrap();
        store.set_stock_write_delay(Duration::from_millis(50));

        let stream = Arc::new(InMemoryStream::new());
        stream.push(0, sale_payload("A", 1));
        stream.push(0, sale_payload("A", 2));

        let pool = WorkerPool::start(stream.clone(), processor, test_config(), metrics.clone());
        // first sale in progress, second already queued behind it
        wait_for(|| metrics.messages_in_flight.get() == 1 && stream.undelivered() == 0).await;

        pool.shutdown().await;

        let offsets: Vec<i64> = stream.commits().iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 1]);
        assert_eq!(ledger.get_quantity(&p("A")).await.unwrap(), 7);
    }
}
