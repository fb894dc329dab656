//! Tax service contract
//!
//! The ledger sends a [`TaxRequest`] describing either a shipment or a
//! return and receives a [`TaxResult`]. The service must be idempotent:
//! the same request always yields the same result, so the ledger may retry.

use super::types::Address;
use crate::money::{Currency, Money};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxDocumentKind {
    Shipment,
    Return,
}

/// One taxable line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLine {
    pub line_id: String,
    pub sku_code: String,
    pub quantity: u32,
    /// Line amount after discount
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRequest {
    /// Correlates the calculation with the shipment or return it was made for
    pub document_id: String,
    pub kind: TaxDocumentKind,
    pub currency: Currency,
    pub lines: Vec<TaxLine>,
    /// Physical shipments only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_cost: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Tax amount for one category (e.g. "GST", "PST")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxCategoryAmount {
    pub name: String,
    pub display_name: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxResult {
    /// Tax per request line, keyed by `TaxLine::line_id`
    pub line_taxes: HashMap<String, Money>,
    pub shipping_tax: Money,
    /// Tax is embedded in the prices rather than added on top
    pub inclusive: bool,
    #[serde(default)]
    pub categories: Vec<TaxCategoryAmount>,
}

impl TaxResult {
    /// Sum of the per-line taxes
    pub fn item_tax(&self) -> Money {
        Money::sum(self.shipping_tax.currency(), self.line_taxes.values().copied())
    }
}
