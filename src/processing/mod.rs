// ============================================================================
// Processing - consumer side of the sale pipeline
// ============================================================================
//
// - processor - SaleEventProcessor (decode → claim → apply → disposition)
// - worker    - WorkerPool (poller + per-partition workers, commits, rewinds)
//
// ============================================================================

pub mod processor;
pub mod worker;

pub use processor::{Disposition, Outcome, SaleEventProcessor};
pub use worker::{WorkerPool, WorkerPoolConfig};
