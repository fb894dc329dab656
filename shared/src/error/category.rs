//! Error category classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Error category classification based on error code ranges
///
/// Categories are determined by the leading digit of the error code:
/// - 0xxx: General errors
/// - 4xxx: Order and shipment errors
/// - 5xxx: Payment errors
/// - 6xxx: Return errors
/// - 7xxx: Tax errors
/// - 9xxx: System errors
///
/// Unassigned ranges fall back to `General` below 4000 and `System` above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// General errors (0xxx)
    General,
    /// Order and shipment errors (4xxx)
    Order,
    /// Payment errors (5xxx)
    Payment,
    /// Return and exchange errors (6xxx)
    Return,
    /// Tax service errors (7xxx)
    Tax,
    /// System errors (9xxx)
    System,
}

impl ErrorCategory {
    /// Determine category from error code value
    pub fn from_code(code: u16) -> Self {
        match code {
            0..4000 => Self::General,
            4000..5000 => Self::Order,
            5000..6000 => Self::Payment,
            6000..7000 => Self::Return,
            7000..8000 => Self::Tax,
            _ => Self::System,
        }
    }

    /// Get the string name for this category
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Order => "order",
            Self::Payment => "payment",
            Self::Return => "return",
            Self::Tax => "tax",
            Self::System => "system",
        }
    }
}

impl ErrorCode {
    /// Get the category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code() {
        assert_eq!(ErrorCategory::from_code(0), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(999), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(4001), ErrorCategory::Order);
        assert_eq!(ErrorCategory::from_code(5001), ErrorCategory::Payment);
        assert_eq!(ErrorCategory::from_code(6001), ErrorCategory::Return);
        assert_eq!(ErrorCategory::from_code(7001), ErrorCategory::Tax);
        assert_eq!(ErrorCategory::from_code(9001), ErrorCategory::System);
        assert_eq!(ErrorCategory::from_code(10000), ErrorCategory::System);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::Success.category(), ErrorCategory::General);
        assert_eq!(ErrorCode::ShipmentNotFound.category(), ErrorCategory::Order);
        assert_eq!(ErrorCode::PaymentInvalid.category(), ErrorCategory::Payment);
        assert_eq!(
            ErrorCode::ReturnSpansShipments.category(),
            ErrorCategory::Return
        );
        assert_eq!(ErrorCode::TaxServiceTimeout.category(), ErrorCategory::Tax);
        assert_eq!(ErrorCode::InternalError.category(), ErrorCategory::System);
    }

    #[test]
    fn test_category_serialize() {
        let json = serde_json::to_string(&ErrorCategory::Return).unwrap();
        assert_eq!(json, "\"return\"");
        assert_eq!(ErrorCategory::Tax.name(), "tax");
    }
}
