use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Sale event processing (outcome, latency, in-flight)
// - Offset commits and partition rewinds
// - Sales published by the HTTP side
// - Retry outcomes
// - Dead letters by reason
// - Producer circuit breaker state
// - Operator alerts
//
// Scraped via GET /metrics on the HTTP server.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Consumer side
    pub sales_processed: IntCounterVec,
    pub sale_processing_duration: HistogramVec,
    pub messages_in_flight: IntGauge,
    pub offsets_committed: IntCounter,
    pub partition_rewinds: IntCounter,

    // Producer side
    pub sales_published: IntCounterVec,

    // Retry Metrics
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_reason: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,

    pub operator_alerts: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let sales_processed = IntCounterVec::new(
            Opts::new("sales_processed_total", "Sale events handled by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(sales_processed.clone()))?;

        let sale_processing_duration = HistogramVec::new(
            HistogramOpts::new("sale_processing_duration_seconds", "Sale event processing duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(sale_processing_duration.clone()))?;

        let messages_in_flight = IntGauge::new(
            "messages_in_flight",
            "Deliveries currently being processed by workers",
        )?;
        registry.register(Box::new(messages_in_flight.clone()))?;

        let offsets_committed = IntCounter::new(
            "offsets_committed_total",
            "Consumer offsets committed after processing",
        )?;
        registry.register(Box::new(offsets_committed.clone()))?;

        let partition_rewinds = IntCounter::new(
            "partition_rewinds_total",
            "Partitions rewound so an unacknowledged message is redelivered",
        )?;
        registry.register(Box::new(partition_rewinds.clone()))?;

        let sales_published = IntCounterVec::new(
            Opts::new("sales_published_total", "Sale publish attempts by result"),
            &["result"],
        )?;
        registry.register(Box::new(sales_published.clone()))?;

        // Retry Metrics
        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Operations that eventually succeeded"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Operations that failed after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        // DLQ Metrics
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total messages in dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_reason = IntCounterVec::new(
            Opts::new("dlq_messages_by_reason", "DLQ messages by failure reason"),
            &["reason"],
        )?;
        registry.register(Box::new(dlq_messages_by_reason.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        let operator_alerts = IntCounterVec::new(
            Opts::new("operator_alerts_total", "Alerts raised for operator attention"),
            &["component"],
        )?;
        registry.register(Box::new(operator_alerts.clone()))?;

        Ok(Self {
            registry,
            sales_processed,
            sale_processing_duration,
            messages_in_flight,
            offsets_committed,
            partition_rewinds,
            sales_published,
            retry_success,
            retry_failure,
            dlq_messages_total,
            dlq_messages_by_reason,
            circuit_breaker_state,
            circuit_breaker_transitions,
            operator_alerts,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_sale_processed(&self, outcome: &str, duration_secs: f64) {
        self.sales_processed.with_label_values(&[outcome]).inc();
        self.sale_processing_duration.with_label_values(&[outcome]).observe(duration_secs);
    }

    pub fn record_sale_published(&self, result: &str) {
        self.sales_published.with_label_values(&[result]).inc();
    }

    pub fn record_retry_outcome(&self, operation: &str, success: bool) {
        if success {
            self.retry_success.with_label_values(&[operation]).inc();
        } else {
            self.retry_failure.with_label_values(&[operation]).inc();
        }
    }

    pub fn record_dlq_message(&self, reason: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_reason.with_label_values(&[reason]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    pub fn record_circuit_breaker_transition(&self, from_state: &str, to_state: &str) {
        self.circuit_breaker_transitions.with_label_values(&[from_state, to_state]).inc();
    }

    pub fn record_alert(&self, component: &str) {
        self.operator_alerts.with_label_values(&[component]).inc();
    }
}
