//! Status enums and value types shared by orders, shipments and returns

use crate::money::Money;
use serde::{Deserialize, Serialize};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Created,
    OnHold,
    InProgress,
    PartiallyShipped,
    Completed,
    Cancelled,
    AwaitingExchange,
    Failed,
}

impl OrderStatus {
    /// COMPLETED, CANCELLED and FAILED are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// States in which shipment progress is allowed to move the order
    pub fn follows_shipments(&self) -> bool {
        matches!(
            self,
            Self::InProgress | Self::PartiallyShipped | Self::Completed
        )
    }
}

/// Shipment fulfilment status (stored value; see effective status in the engine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    #[default]
    OnHold,
    AwaitingInventory,
    InventoryAssigned,
    Released,
    Shipped,
    Cancelled,
    Failed,
}

impl ShipmentStatus {
    /// SHIPPED, CANCELLED and FAILED are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Shipped | Self::Cancelled | Self::Failed)
    }

    /// The two states between which allocation changes move a shipment
    pub fn is_allocation_driven(&self) -> bool {
        matches!(self, Self::AwaitingInventory | Self::InventoryAssigned)
    }
}

/// Kind of shipment; decides which amounts participate in its totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentKind {
    Physical,
    Electronic,
    Service,
}

/// Return / exchange status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    #[default]
    AwaitingStockReturn,
    AwaitingCompletion,
    Completed,
    Cancelled,
}

impl ReturnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnKind {
    #[default]
    Return,
    Exchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Capture,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Approved,
    Declined,
    Failed,
}

/// A payment as recorded by the payment gateway
///
/// The ledger only reads these; capture and refund happen elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub amount: Money,
    pub transaction_type: TransactionType,
    pub status: PaymentStatus,
    /// RMA code of the return this payment settles (credits issued for a return)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rma_code: Option<String>,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl PaymentRecord {
    pub fn is_approved(&self) -> bool {
        self.status == PaymentStatus::Approved
    }
}

/// Destination address used by the tax service for jurisdiction lookup
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}
