//! Unified error system for the order ledger
//!
//! This module provides:
//! - [`ErrorCode`]: Standardized error codes for all error types
//! - [`ErrorCategory`]: Classification of errors by domain
//! - [`AppError`]: Rich error type with codes, messages, and details
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 4xxx: Order and shipment errors
//! - 5xxx: Payment errors
//! - 6xxx: Return errors
//! - 7xxx: Tax errors
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode};
//!
//! let err = AppError::new(ErrorCode::ShipmentNotFound);
//! assert_eq!(err.code.code(), 4002);
//!
//! let err = AppError::with_message(ErrorCode::ReturnQuantityExceeded, "qty 3 > 2")
//!     .with_detail("line_item_id", "sku-1");
//! assert!(err.details.is_some());
//! ```

mod category;
mod codes;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{AppError, AppResult};
