use super::*;
use crate::ledger::TaxError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::order::{
    OrderStatus, PaymentStatus, ReturnKind, TaxCategoryAmount, TransactionType,
};
use std::sync::atomic::{AtomicU32, AtomicUsize};
use std::time::Duration;
use tokio::sync::Notify;

// ========================================================================
// Scripted tax service
// ========================================================================

/// In-memory tax service: flat rate per line and on shipping
///
/// Can be told to fail, reject, stall, or pause its next call until released.
pub(super) struct ScriptedTax {
    rate: Decimal,
    inclusive: bool,
    delay: Option<Duration>,
    reject: bool,
    failures_left: AtomicU32,
    calls: AtomicUsize,
    in_flight: parking_lot::Mutex<HashMap<String, usize>>,
    max_in_flight_per_document: AtomicUsize,
    max_in_flight_total: AtomicUsize,
    gate: parking_lot::Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl ScriptedTax {
    pub(super) fn flat(rate: &str) -> Self {
        Self {
            rate: rate.parse().unwrap(),
            inclusive: false,
            delay: None,
            reject: false,
            failures_left: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
            max_in_flight_per_document: AtomicUsize::new(0),
            max_in_flight_total: AtomicUsize::new(0),
            gate: parking_lot::Mutex::new(None),
        }
    }

    pub(super) fn inclusive(mut self) -> Self {
        self.inclusive = true;
        self
    }

    pub(super) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(super) fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    /// Fail the next `n` calls with a transient error
    pub(super) fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Pause the next call: `started` fires when it begins, it returns once
    /// `proceed` is notified
    pub(super) fn pause_next(&self) -> (Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let proceed = Arc::new(Notify::new());
        *self.gate.lock() = Some((started.clone(), proceed.clone()));
        (started, proceed)
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) fn max_in_flight_per_document(&self) -> usize {
        self.max_in_flight_per_document.load(Ordering::SeqCst)
    }

    pub(super) fn max_in_flight_total(&self) -> usize {
        self.max_in_flight_total.load(Ordering::SeqCst)
    }

    fn enter(&self, document_id: &str) -> InFlight<'_> {
        let mut in_flight = self.in_flight.lock();
        let count = in_flight.entry(document_id.to_string()).or_default();
        *count += 1;
        self.max_in_flight_per_document
            .fetch_max(*count, Ordering::SeqCst);
        let total: usize = in_flight.values().sum();
        self.max_in_flight_total.fetch_max(total, Ordering::SeqCst);
        InFlight {
            tax: self,
            document_id: document_id.to_string(),
        }
    }

    fn respond(&self, request: &TaxRequest) -> TaxResult {
        let currency = request.currency;
        let line_taxes: HashMap<String, Money> = request
            .lines
            .iter()
            .map(|l| (l.line_id.clone(), (l.amount * self.rate).rounded()))
            .collect();
        let shipping_tax = request
            .shipping_cost
            .map(|c| (c * self.rate).rounded())
            .unwrap_or_else(|| Money::zero(currency));
        let total = Money::sum(currency, line_taxes.values().copied()) + shipping_tax;
        TaxResult {
            line_taxes,
            shipping_tax,
            inclusive: self.inclusive,
            categories: vec![TaxCategoryAmount {
                name: "VAT".into(),
                display_name: "Value Added Tax".into(),
                amount: total,
            }],
        }
    }
}

/// Decrements the in-flight counter even when the call is dropped by a timeout
struct InFlight<'a> {
    tax: &'a ScriptedTax,
    document_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.tax.in_flight.lock().get_mut(&self.document_id) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl TaxService for ScriptedTax {
    async fn calculate_taxes(&self, request: &TaxRequest) -> Result<TaxResult, TaxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter(&request.document_id);

        let gate = self.gate.lock().take();
        if let Some((started, proceed)) = gate {
            started.notify_one();
            proceed.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject {
            return Err(TaxError::Rejected("no jurisdiction for address".into()));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TaxError::Unavailable("connection reset".into()));
        }
        Ok(self.respond(request))
    }
}

// ========================================================================
// Helpers
// ========================================================================

fn usd(s: &str) -> Money {
    Money::new(s.parse().unwrap(), Currency::USD)
}

fn create_coordinator_with(tax: ScriptedTax, config: Config) -> (Coordinator, Arc<ScriptedTax>) {
    let tax = Arc::new(tax);
    let coordinator = Coordinator::new(tax.clone(), config);
    (coordinator, tax)
}

/// 10% exclusive tax, 1s timeout, 3 attempts, no backoff
fn create_test_coordinator() -> (Coordinator, Arc<ScriptedTax>) {
    create_coordinator_with(ScriptedTax::flat("0.10"), Config::with_overrides(1000, 3))
}

fn open_order(coordinator: &Coordinator, order_number: &str) {
    coordinator.create_order(order_number, Currency::USD).unwrap();
    coordinator.mark_persisted(order_number).unwrap();
}

/// Fully allocated line
fn line(id: &str, quantity: u32, unit_price: &str) -> LineItem {
    LineItem::new(id, format!("SKU-{}", id), quantity, usd(unit_price)).with_allocated(quantity)
}

/// Add a shipment of `kind` holding `lines` and return its number
async fn add_shipment_with(
    coordinator: &Coordinator,
    order_number: &str,
    kind: ShipmentKind,
    lines: Vec<LineItem>,
) -> String {
    let shipment_number = coordinator.add_shipment(order_number, kind).unwrap();
    for item in lines {
        coordinator
            .add_line_item(order_number, &shipment_number, item)
            .await
            .unwrap();
    }
    shipment_number
}

/// Checkout then release the order: allocated shipments end INVENTORY_ASSIGNED
fn checkout(coordinator: &Coordinator, order_number: &str) {
    coordinator.assign_inventory(order_number).unwrap();
    coordinator.release(order_number).unwrap();
}

fn ship(coordinator: &Coordinator, order_number: &str, shipment_number: &str) {
    coordinator
        .release_shipment(order_number, shipment_number)
        .unwrap();
    coordinator
        .complete_shipment(order_number, shipment_number)
        .unwrap();
}

fn payment(
    id: &str,
    amount: &str,
    transaction_type: TransactionType,
    rma_code: Option<&str>,
) -> PaymentRecord {
    PaymentRecord {
        payment_id: id.to_string(),
        amount: usd(amount),
        transaction_type,
        status: PaymentStatus::Approved,
        rma_code: rma_code.map(str::to_string),
        timestamp: Utc::now().timestamp_millis(),
    }
}

fn return_draft(rma_code: &str, kind: ReturnKind, lines: &[(&str, u32)]) -> ReturnDraft {
    ReturnDraft {
        rma_code: rma_code.to_string(),
        kind,
        physical_return: true,
        lines: lines
            .iter()
            .map(|(id, quantity)| ReturnLineInput {
                line_item_id: id.to_string(),
                quantity: *quantity,
            })
            .collect(),
        shipping_cost: None,
        shipment_discount: None,
        less_restock_amount: None,
    }
}

/// Drain every event currently buffered on the receiver
fn drain(rx: &mut broadcast::Receiver<LedgerEvent>) -> Vec<LedgerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

mod test_core;
mod test_returns;
