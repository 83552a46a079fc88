// ============================================================================
// Domain Layer
// ============================================================================
//
// Sale-side types shared by the publisher and the stock consumer. Stock
// accounting itself lives in `inventory`.
//
// ============================================================================

pub mod sale;
