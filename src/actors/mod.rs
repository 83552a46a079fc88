// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for asynchronous, concurrent operations.
//
// Structure:
// - core/           - Shared types (HealthStatus, ComponentHealth)
// - infrastructure/ - Concrete infrastructure actors (DLQ, Health)
//
// Note: Stock accounting (ledger, idempotency) does NOT live in actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

mod core;
mod infrastructure;

pub use core::{ComponentHealth, HealthStatus};
pub use infrastructure::{
    AddToDlq,
    DeadLetter,
    DeadLetterReason,
    DlqActor,
    DlqError,
    DlqMessages,
    DlqStats,
    GetDlqMessages,
    GetDlqStats,
    GetSystemHealth,
    HealthMonitorActor,
    RaiseAlert,
    SystemHealth,
    UpdateHealth,
};
