//! Order ledger vocabulary
//!
//! This module provides the types exchanged between the ledger engine and
//! its collaborators:
//! - Types: status enums, shipment kinds, payment records, addresses
//! - Tax: the request/result contract of the external tax service
//! - Events: notifications broadcast after ledger mutations

pub mod event;
pub mod tax;
pub mod types;

// Re-exports
pub use event::{LedgerEvent, LedgerEventPayload};
pub use tax::{TaxCategoryAmount, TaxDocumentKind, TaxLine, TaxRequest, TaxResult};
pub use types::*;
