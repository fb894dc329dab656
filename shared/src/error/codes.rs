//! Unified error codes for the order ledger
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Order and shipment errors
//! - 5xxx: Payment errors
//! - 6xxx: Return errors
//! - 7xxx: Tax errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Invalid request
    InvalidRequest = 5,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Shipment not found on the order
    ShipmentNotFound = 4002,
    /// Line item not found on the shipment
    LineItemNotFound = 4003,
    /// Order has not been persisted yet
    OrderNotPersisted = 4004,
    /// Operation not allowed in the current state
    InvalidOrderState = 4005,
    /// Money values with different currencies were combined
    CurrencyMismatch = 4006,
    /// Bundle parent link would not resolve to a root
    InvalidBundle = 4007,
    /// Shipment kept changing while its recompute was in flight
    RecomputeConflict = 4008,

    // ==================== 5xxx: Payment ====================
    /// Payment record rejected
    PaymentInvalid = 5001,

    // ==================== 6xxx: Return ====================
    /// Return not found on the order
    ReturnNotFound = 6001,
    /// Return references line items of more than one shipment
    ReturnSpansShipments = 6002,
    /// Return quantity exceeds the remaining returnable quantity
    ReturnQuantityExceeded = 6003,
    /// Return is completed or cancelled
    ReturnClosed = 6004,
    /// Order is not linked to an exchange return
    ExchangeNotLinked = 6005,

    // ==================== 7xxx: Tax ====================
    /// Tax service reported a failure
    TaxServiceFailed = 7001,
    /// Tax service did not answer in time
    TaxServiceTimeout = 7002,
    /// Tax service returned a result that does not match the request
    TaxResultInvalid = 7003,

    // ==================== 9xxx: System ====================
    /// Internal error
    InternalError = 9001,
    /// Configuration error
    ConfigError = 9002,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::ValueOutOfRange => "Value out of range",

            // Order
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::ShipmentNotFound => "Shipment not found",
            ErrorCode::LineItemNotFound => "Line item not found",
            ErrorCode::OrderNotPersisted => "Order has not been persisted",
            ErrorCode::InvalidOrderState => "Operation not allowed in the current state",
            ErrorCode::CurrencyMismatch => "Currency mismatch",
            ErrorCode::InvalidBundle => "Invalid bundle structure",
            ErrorCode::RecomputeConflict => "Shipment changed during recompute",

            // Payment
            ErrorCode::PaymentInvalid => "Payment record rejected",

            // Return
            ErrorCode::ReturnNotFound => "Return not found",
            ErrorCode::ReturnSpansShipments => "Return spans more than one shipment",
            ErrorCode::ReturnQuantityExceeded => "Return quantity exceeds returnable quantity",
            ErrorCode::ReturnClosed => "Return is already closed",
            ErrorCode::ExchangeNotLinked => "Order is not an exchange order",

            // Tax
            ErrorCode::TaxServiceFailed => "Tax service failed",
            ErrorCode::TaxServiceTimeout => "Tax service timed out",
            ErrorCode::TaxResultInvalid => "Tax service returned an invalid result",

            // System
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ConfigError => "Configuration error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            5 => Ok(ErrorCode::InvalidRequest),
            8 => Ok(ErrorCode::ValueOutOfRange),

            // Order
            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::ShipmentNotFound),
            4003 => Ok(ErrorCode::LineItemNotFound),
            4004 => Ok(ErrorCode::OrderNotPersisted),
            4005 => Ok(ErrorCode::InvalidOrderState),
            4006 => Ok(ErrorCode::CurrencyMismatch),
            4007 => Ok(ErrorCode::InvalidBundle),
            4008 => Ok(ErrorCode::RecomputeConflict),

            // Payment
            5001 => Ok(ErrorCode::PaymentInvalid),

            // Return
            6001 => Ok(ErrorCode::ReturnNotFound),
            6002 => Ok(ErrorCode::ReturnSpansShipments),
            6003 => Ok(ErrorCode::ReturnQuantityExceeded),
            6004 => Ok(ErrorCode::ReturnClosed),
            6005 => Ok(ErrorCode::ExchangeNotLinked),

            // Tax
            7001 => Ok(ErrorCode::TaxServiceFailed),
            7002 => Ok(ErrorCode::TaxServiceTimeout),
            7003 => Ok(ErrorCode::TaxResultInvalid),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
