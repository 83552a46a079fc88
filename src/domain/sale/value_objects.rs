use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ValidationError;

// ============================================================================
// Sale Value Objects
// ============================================================================

/// Product identifier. Never empty or whitespace-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ValidationError::EmptyProductId);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProductId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ProductId> for String {
    fn from(value: ProductId) -> Self {
        value.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of units sold. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(units: i64) -> Result<Self, ValidationError> {
        if units <= 0 {
            return Err(ValidationError::NonPositiveQuantity(units));
        }
        u32::try_from(units)
            .map(Self)
            .map_err(|_| ValidationError::QuantityTooLarge(units))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Stock delta a sale of this quantity applies to the ledger
    pub fn as_sale_delta(&self) -> i64 {
        -i64::from(self.0)
    }
}

impl TryFrom<i64> for Quantity {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        i64::from(value.0)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_rejects_blank() {
        assert_eq!(ProductId::parse(""), Err(ValidationError::EmptyProductId));
        assert_eq!(ProductId::parse("   "), Err(ValidationError::EmptyProductId));
        assert_eq!(ProductId::parse("P1").unwrap().as_str(), "P1");
    }

    #[test]
    fn test_quantity_bounds() {
        assert_eq!(Quantity::new(0), Err(ValidationError::NonPositiveQuantity(0)));
        assert_eq!(Quantity::new(-4), Err(ValidationError::NonPositiveQuantity(-4)));
        assert_eq!(
            Quantity::new(i64::from(u32::MAX) + 1),
            Err(ValidationError::QuantityTooLarge(i64::from(u32::MAX) + 1))
        );
        assert_eq!(Quantity::new(3).unwrap().get(), 3);
    }

    #[test]
    fn test_sale_delta_is_negative() {
        assert_eq!(Quantity::new(5).unwrap().as_sale_delta(), -5);
    }

    #[test]
    fn test_product_id_serde_validates() {
        let ok: ProductId = serde_json::from_str("\"SKU-9\"").unwrap();
        assert_eq!(ok.as_str(), "SKU-9");
        assert!(serde_json::from_str::<ProductId>("\"\"").is_err());
    }
}
