// ============================================================================
// Sale Domain
// ============================================================================
//
// - Value objects (ProductId, Quantity)
// - Events (SaleEvent)
// - Errors (ValidationError, DecodeError)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod errors;

pub use value_objects::*;
pub use events::*;
pub use errors::*;
