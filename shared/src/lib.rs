//! Shared types for the order ledger
//!
//! Common vocabulary used by the ledger engine and its callers:
//! money values, order/shipment/return status enums, payment records,
//! the tax service contract types, ledger events and the unified error
//! code system.

pub mod error;
pub mod money;
pub mod order;

// Re-exports
pub use money::{Currency, Money, MoneyError};
pub use serde::{Deserialize, Serialize};
