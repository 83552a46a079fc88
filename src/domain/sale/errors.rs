// ============================================================================
// Sale Errors
// ============================================================================

/// A sale request or event field violates a business invariant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("product id must not be empty")]
    EmptyProductId,

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),

    #[error("quantity {0} exceeds the supported maximum")]
    QuantityTooLarge(i64),
}

/// A payload consumed from the stream could not be turned into a `SaleEvent`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload")]
    EmptyPayload,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    Invalid(#[from] ValidationError),
}
