//! Ledger model
//!
//! Plain data plus the pure arithmetic and state machines of the engine:
//!
//! - **line_item**: per-SKU amounts and allocation
//! - **shipment**: shipment totals, tax application, fulfilment status
//! - **order**: order total, status derived from shipments, balance
//! - **returns**: return/exchange proration and status
//! - **payment**: approved capture/credit sums
//! - **tax**: the external tax service seam
//! - **money**: rounding and proration helpers
//!
//! Nothing in here locks or awaits; the coordinator owns concurrency.

pub mod error;
pub mod line_item;
pub mod money;
pub mod order;
pub mod payment;
pub mod returns;
pub mod shipment;
pub mod tax;

pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use line_item::{LineChange, LineItem};
pub use order::{ExchangeLink, LineItemUpdate, Order, OrderTotals, ShipmentSummary, StatusChanges};
pub use payment::{PaymentLedger, PaymentSummary};
pub use returns::{ReturnDraft, ReturnLine, ReturnLineInput, ReturnRequest, ReturnTotals};
pub use shipment::{effective_status, RecomputePlan, Shipment, ShipmentTotals};
pub use tax::{TaxError, TaxService};

/// A status change `from → to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}
