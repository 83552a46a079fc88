// ============================================================================
// Core Actor Types
// ============================================================================
//
// Types shared by the infrastructure actors and the HTTP surface.
//
// ============================================================================

pub mod health;

pub use health::*;
