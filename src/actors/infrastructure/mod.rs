// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Actors for system concerns around the sale pipeline:
// - Dead letter queue
// - Health monitoring and operator alerts
//
// ============================================================================

mod dlq;
mod health_monitor;

pub use dlq::{
    AddToDlq, DeadLetter, DeadLetterReason, DlqActor, DlqError, DlqMessages, DlqStats,
    GetDlqMessages, GetDlqStats,
};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, RaiseAlert, SystemHealth, UpdateHealth};
