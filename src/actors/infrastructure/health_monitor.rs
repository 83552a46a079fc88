use chrono::Utc;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actors::core::{ComponentHealth, HealthStatus};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitState};

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health status of the pipeline components (producer, store, consumer)
// - Poll the producer circuit breaker and mirror it into metrics
// - Aggregate system-wide health for GET /health
// - Raise operator alerts (stuck messages, insufficient stock, corrupt data)
//
// An alert degrades its component only for `alert_window`; a component that
// stops alerting reads healthy again without anyone resetting it.
//
// ============================================================================

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_ALERT_WINDOW: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

/// Something an operator has to look at
#[derive(Debug)]
pub struct RaiseAlert {
    pub component: String,
    pub message: String,
}

pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub alerts_raised: u64,
    pub check_time: chrono::DateTime<Utc>,
}

// Implement Reply for SystemHealth to use it as a message reply type
impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

struct ActiveAlert {
    message: String,
    raised_at: Instant,
}

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    alerts: HashMap<String, ActiveAlert>,
    producer_breaker: Option<CircuitBreaker>,
    metrics: Arc<Metrics>,
    check_interval: Duration,
    alert_window: Duration,
    alerts_raised: u64,
}

impl HealthMonitorActor {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            components: HashMap::new(),
            alerts: HashMap::new(),
            producer_breaker: None,
            metrics,
            check_interval: DEFAULT_CHECK_INTERVAL,
            alert_window: DEFAULT_ALERT_WINDOW,
            alerts_raised: 0,
        }
    }

    /// Watch the producer's circuit breaker
    pub fn with_producer_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.producer_breaker = Some(breaker);
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// How long an alert keeps its component degraded
    pub fn with_alert_window(mut self, window: Duration) -> Self {
        self.alert_window = window;
        self
    }

    /// Reported component health: an otherwise healthy component with a
    /// recent alert shows as degraded.
    fn current_components(&mut self) -> HashMap<String, ComponentHealth> {
        let now = Instant::now();
        let window = self.alert_window;
        self.alerts
            .retain(|_, alert| now.duration_since(alert.raised_at) < window);

        let mut components = self.components.clone();
        for (name, alert) in &self.alerts {
            let health = components
                .entry(name.clone())
                .or_insert_with(|| ComponentHealth::new(name.clone(), HealthStatus::Healthy));
            if health.status.is_healthy() {
                *health = ComponentHealth::new(name.clone(), HealthStatus::Degraded(alert.message.clone()))
                    .with_details(alert.message.clone());
            }
        }
        components
    }

    fn compute_overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            unhealthy_components.sort();
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

fn breaker_health(state: CircuitState) -> HealthStatus {
    match state {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(
            check_interval_secs = state.check_interval.as_secs(),
            "HealthMonitorActor started"
        );

        if let Some(breaker) = state.producer_breaker.clone() {
            let metrics = state.metrics.clone();
            let actor_ref = actor_ref.downgrade();
            let check_interval = state.check_interval;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(check_interval);
                loop {
                    interval.tick().await;

                    let circuit = breaker.get_state().await;
                    metrics.update_circuit_breaker_state(circuit.as_gauge());

                    // stop polling once the monitor is gone
                    let Some(actor_ref) = actor_ref.upgrade() else {
                        break;
                    };
                    let update = UpdateHealth {
                        component: "producer".to_string(),
                        status: breaker_health(circuit),
                        details: None,
                    };
                    if actor_ref.tell(update).send().await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let mut health = ComponentHealth::new(msg.component.clone(), msg.status.clone());
        if let Some(details) = msg.details {
            health = health.with_details(details);
        }

        let changed = self
            .components
            .get(&msg.component)
            .map_or(true, |previous| previous.status != msg.status);
        if changed && !msg.status.is_healthy() {
            tracing::warn!(component = %msg.component, status = ?msg.status, "Component health changed");
        } else {
            tracing::debug!(component = %msg.component, status = ?msg.status, "Updated component health");
        }

        self.components.insert(msg.component, health);
    }
}

impl Message<RaiseAlert> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: RaiseAlert, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.alerts_raised += 1;
        self.metrics.record_alert(&msg.component);

        tracing::error!(
            component = %msg.component,
            alert = %msg.message,
            "Operator attention required"
        );

        self.alerts.insert(
            msg.component,
            ActiveAlert {
                message: msg.message,
                raised_at: Instant::now(),
            },
        );
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let components = self.current_components();
        SystemHealth {
            overall_status: Self::compute_overall_status(&components),
            components,
            alerts_raised: self.alerts_raised,
            check_time: Utc::now(),
        }
    }
}
