//! Ledger events - notifications broadcast after a mutation has been applied

use super::types::{OrderStatus, ReturnStatus, ShipmentStatus};
use crate::money::Money;
use serde::{Deserialize, Serialize};

/// Ledger event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Per-process sequence number (ordering within one engine instance)
    pub sequence: u64,
    /// Order this event belongs to
    pub order_number: String,
    /// Server timestamp (Unix milliseconds)
    pub timestamp: i64,
    /// Event payload
    pub payload: LedgerEventPayload,
}

/// Event payload variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEventPayload {
    ShipmentRecomputed {
        shipment_number: String,
        subtotal: Money,
        total: Money,
        /// Tax service was consulted during this pass
        tax_refreshed: bool,
    },
    ShipmentStatusChanged {
        shipment_number: String,
        from: ShipmentStatus,
        to: ShipmentStatus,
    },
    OrderStatusChanged {
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderTotalChanged {
        total: Money,
    },
    ReturnStatusChanged {
        rma_code: String,
        from: ReturnStatus,
        to: ReturnStatus,
    },
}
