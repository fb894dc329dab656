//! Coordinator - 变更传播与重算调度
//!
//! Owns every loaded order and decides when a mutation propagates:
//!
//! ```text
//! add/update/remove line, shipping cost, discount
//!     ├─ 1. Mutate the order under its lock (revision++)
//!     ├─ 2. recompute_shipment
//!     │     ├─ per-shipment async lock (one in-flight recompute)
//!     │     ├─ plan under the order lock
//!     │     ├─ tax call with timeout + retries (no lock held)
//!     │     └─ apply iff the revision is unchanged, else re-plan
//!     ├─ 3. order total = Σ shipment totals (order lock)
//!     └─ 4. Broadcast ledger events
//! ```
//!
//! Order locks are `parking_lot` mutexes and are never held across `.await`
//! or while another order's lock is taken.

use crate::core::Config;
use crate::ledger::tax::validate_result;
use crate::ledger::{
    LedgerError, LedgerResult, LineChange, LineItem, LineItemUpdate, Order, OrderTotals, PaymentSummary,
    RecomputePlan, ReturnDraft, ReturnLineInput, ReturnTotals, ShipmentTotals, StatusChanges,
    TaxService, Transition,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use shared::money::{Currency, Money};
use shared::order::{
    Address, LedgerEvent, LedgerEventPayload, OrderStatus, PaymentRecord, ReturnStatus,
    ShipmentKind, ShipmentStatus, TaxRequest, TaxResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

type OrderHandle = Arc<Mutex<Order>>;

/// Recompute coordinator
pub struct Coordinator {
    orders: RwLock<HashMap<String, OrderHandle>>,
    /// One async lock per (order, shipment), held for a whole recompute pass
    /// and dropped from the map once nobody waits on it
    shipment_locks: DashMap<(String, String), Arc<tokio::sync::Mutex<()>>>,
    tax: Arc<dyn TaxService>,
    config: Config,
    event_tx: broadcast::Sender<LedgerEvent>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("orders", &self.orders.read().len())
            .field("shipment_locks", &self.shipment_locks.len())
            .field("tax", &"<dyn TaxService>")
            .field("event_tx", &"<broadcast::Sender>")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

enum Step {
    Derived(ShipmentTotals),
    Tax(TaxRequest, u64),
}

impl Coordinator {
    pub fn new(tax: Arc<dyn TaxService>, config: Config) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        tracing::info!(
            tax_timeout_ms = config.tax_timeout_ms,
            tax_retry_attempts = config.tax_retry_attempts,
            "Coordinator started"
        );
        Self {
            orders: RwLock::new(HashMap::new()),
            shipment_locks: DashMap::new(),
            tax,
            config,
            event_tx,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to ledger events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.event_tx.subscribe()
    }

    // ========== Order registry ==========

    pub fn create_order(&self, order_number: &str, currency: Currency) -> LedgerResult<()> {
        self.insert(Order::new(order_number, currency))?;
        tracing::info!(order_number = %order_number, currency = %currency, "Order created");
        Ok(())
    }

    /// Register an order read back from storage
    ///
    /// Hydrated orders come in with recalculation switched off; call
    /// [`Coordinator::recalculate_after_load`] once the aggregate is complete.
    pub fn load_order(&self, order: Order) -> LedgerResult<()> {
        let number = order.number().to_string();
        self.insert(order)?;
        tracing::debug!(order_number = %number, "Order loaded");
        Ok(())
    }

    fn insert(&self, order: Order) -> LedgerResult<()> {
        let mut orders = self.orders.write();
        if orders.contains_key(order.number()) {
            return Err(LedgerError::OrderAlreadyExists(order.number().to_string()));
        }
        orders.insert(order.number().to_string(), Arc::new(Mutex::new(order)));
        Ok(())
    }

    /// Clone of the current order state (for persistence)
    pub fn snapshot(&self, order_number: &str) -> LedgerResult<Order> {
        Ok(self.handle(order_number)?.lock().clone())
    }

    fn handle(&self, order_number: &str) -> LedgerResult<OrderHandle> {
        self.orders
            .read()
            .get(order_number)
            .cloned()
            .ok_or_else(|| LedgerError::OrderNotFound(order_number.to_string()))
    }

    fn with_order<T, F>(&self, order_number: &str, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Order) -> LedgerResult<T>,
    {
        let handle = self.handle(order_number)?;
        let mut order = handle.lock();
        f(&mut order)
    }

    pub fn mark_persisted(&self, order_number: &str) -> LedgerResult<()> {
        self.with_order(order_number, |order| {
            order.mark_persisted();
            Ok(())
        })
    }

    /// Re-arm recalculation after hydration
    pub fn recalculate_after_load(&self, order_number: &str) -> LedgerResult<()> {
        self.with_order(order_number, |order| {
            order.set_recalculation_enabled(true);
            Ok(())
        })?;
        tracing::debug!(order_number = %order_number, "Recalculation re-armed after load");
        Ok(())
    }

    /// Re-arm recalculation after a bulk update and bring the totals up to date
    pub async fn recalculate_after_update(&self, order_number: &str) -> LedgerResult<OrderTotals> {
        self.recalculate_after_load(order_number)?;
        self.recompute(order_number).await
    }

    // ========== Shipments and lines ==========

    pub fn add_shipment(&self, order_number: &str, kind: ShipmentKind) -> LedgerResult<String> {
        let (number, transition) = self.with_order(order_number, |order| order.add_shipment(kind))?;
        tracing::info!(order_number = %order_number, shipment_number = %number, kind = ?kind, "Shipment added");
        self.publish_changes(
            order_number,
            &StatusChanges {
                shipments: Vec::new(),
                order: transition,
            },
        );
        Ok(number)
    }

    pub async fn add_line_item(
        &self,
        order_number: &str,
        shipment_number: &str,
        item: LineItem,
    ) -> LedgerResult<ShipmentTotals> {
        let changes = self.with_order(order_number, |order| order.add_line_item(shipment_number, item))?;
        self.publish_changes(order_number, &changes);
        self.recompute_shipment(order_number, shipment_number).await
    }

    /// Remove a line and its bundle children; returns the removed ids
    pub async fn remove_line_item(
        &self,
        order_number: &str,
        shipment_number: &str,
        line_item_id: &str,
    ) -> LedgerResult<Vec<String>> {
        let (removed, changes) = self.with_order(order_number, |order| {
            order.remove_line_item(shipment_number, line_item_id)
        })?;
        tracing::debug!(order_number = %order_number, shipment_number = %shipment_number, removed = ?removed, "Line items removed");
        self.publish_changes(order_number, &changes);
        self.recompute_shipment(order_number, shipment_number).await?;
        Ok(removed)
    }

    pub async fn update_line_item(
        &self,
        order_number: &str,
        shipment_number: &str,
        line_item_id: &str,
        update: LineItemUpdate,
    ) -> LedgerResult<ShipmentTotals> {
        let (change, changes) = self.with_order(order_number, |order| {
            order.update_line_item(shipment_number, line_item_id, &update)
        })?;
        self.publish_changes(order_number, &changes);
        match change {
            Some(LineChange::Amount) => {
                self.recompute_shipment(order_number, shipment_number).await
            }
            _ => self.with_order(order_number, |order| {
                Ok(order.shipment(shipment_number)?.totals())
            }),
        }
    }

    /// Allocation changes only move status; totals are untouched
    pub fn set_allocated_quantity(
        &self,
        order_number: &str,
        shipment_number: &str,
        line_item_id: &str,
        allocated_quantity: u32,
    ) -> LedgerResult<StatusChanges> {
        let changes = self.with_order(order_number, |order| {
            order.set_allocated_quantity(shipment_number, line_item_id, allocated_quantity)
        })?;
        self.publish_changes(order_number, &changes);
        Ok(changes)
    }

    pub fn set_changed_quantity_allocated(
        &self,
        order_number: &str,
        shipment_number: &str,
        line_item_id: &str,
        quantity: u32,
    ) -> LedgerResult<StatusChanges> {
        let changes = self.with_order(order_number, |order| {
            order.set_changed_quantity_allocated(shipment_number, line_item_id, quantity)
        })?;
        self.publish_changes(order_number, &changes);
        Ok(changes)
    }

    pub async fn set_shipping_cost(
        &self,
        order_number: &str,
        shipment_number: &str,
        cost: Money,
    ) -> LedgerResult<ShipmentTotals> {
        self.with_order(order_number, |order| order.set_shipping_cost(shipment_number, cost))?;
        self.recompute_shipment(order_number, shipment_number).await
    }

    pub async fn set_subtotal_discount(
        &self,
        order_number: &str,
        shipment_number: &str,
        discount: Money,
    ) -> LedgerResult<ShipmentTotals> {
        self.with_order(order_number, |order| {
            order.set_subtotal_discount(shipment_number, discount)
        })?;
        self.recompute_shipment(order_number, shipment_number).await
    }

    pub async fn set_shipping_address(
        &self,
        order_number: &str,
        shipment_number: &str,
        address: Address,
    ) -> LedgerResult<ShipmentTotals> {
        self.with_order(order_number, |order| {
            order.set_shipping_address(shipment_number, address)
        })?;
        self.recompute_shipment(order_number, shipment_number).await
    }

    // ========== Status commands ==========

    /// Checkout: shipments leave ON_HOLD according to their allocation
    pub fn assign_inventory(&self, order_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, Order::assign_inventory)
    }

    pub fn release_shipment(&self, order_number: &str, shipment_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, |order| order.release_shipment(shipment_number))
    }

    pub fn complete_shipment(&self, order_number: &str, shipment_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, |order| order.complete_shipment(shipment_number))
    }

    pub fn cancel_shipment(&self, order_number: &str, shipment_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, |order| order.cancel_shipment(shipment_number))
    }

    pub fn hold(&self, order_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, Order::hold)
    }

    pub fn release(&self, order_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, Order::release)
    }

    pub fn cancel(&self, order_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, Order::cancel)
    }

    pub fn fail(&self, order_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, Order::fail)
    }

    pub fn await_exchange(&self, order_number: &str) -> LedgerResult<StatusChanges> {
        self.status_command(order_number, Order::await_exchange)
    }

    fn status_command<F>(&self, order_number: &str, command: F) -> LedgerResult<StatusChanges>
    where
        F: FnOnce(&mut Order) -> LedgerResult<StatusChanges>,
    {
        let changes = self.with_order(order_number, command)?;
        self.publish_changes(order_number, &changes);
        Ok(changes)
    }

    pub fn effective_status(&self, order_number: &str, shipment_number: &str) -> LedgerResult<ShipmentStatus> {
        self.with_order(order_number, |order| order.effective_status(shipment_number))
    }

    // ========== Recompute ==========

    /// Recompute every shipment concurrently, then the order total
    pub async fn recompute(&self, order_number: &str) -> LedgerResult<OrderTotals> {
        let handle = self.handle(order_number)?;
        let numbers: Vec<String> = handle
            .lock()
            .shipments()
            .iter()
            .map(|s| s.number().to_string())
            .collect();

        let results = futures::future::join_all(
            numbers
                .iter()
                .map(|number| self.recompute_shipment_locked(&handle, order_number, number)),
        )
        .await;

        // Totals of the shipments that did succeed still roll up
        self.refresh_order_total(&handle, order_number);
        for result in results {
            result?;
        }
        Ok(handle.lock().totals())
    }

    /// Recompute one shipment, then the order total
    pub async fn recompute_shipment(&self, order_number: &str, shipment_number: &str) -> LedgerResult<ShipmentTotals> {
        let handle = self.handle(order_number)?;
        let totals = self
            .recompute_shipment_locked(&handle, order_number, shipment_number)
            .await;
        self.refresh_order_total(&handle, order_number);
        totals
    }

    async fn recompute_shipment_locked(
        &self,
        handle: &OrderHandle,
        order_number: &str,
        shipment_number: &str,
    ) -> LedgerResult<ShipmentTotals> {
        let key = (order_number.to_string(), shipment_number.to_string());
        let lock = self.shipment_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.run_recompute_passes(handle, order_number, shipment_number)
                .await
        };
        // The map and this task hold the only references: no one is queued
        self.shipment_locks
            .remove_if(&key, |_, held| Arc::strong_count(held) == 2);
        result
    }

    async fn run_recompute_passes(
        &self,
        handle: &OrderHandle,
        order_number: &str,
        shipment_number: &str,
    ) -> LedgerResult<ShipmentTotals> {
        let max_attempts = self.config.recompute_max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let step = {
                let mut order = handle.lock();
                match order.plan_shipment_recompute(shipment_number)? {
                    RecomputePlan::Disabled => {
                        tracing::debug!(order_number = %order_number, shipment_number = %shipment_number, "Recalculation disabled, skipping");
                        return Ok(order.shipment(shipment_number)?.totals());
                    }
                    RecomputePlan::DeriveOnly { revision } => {
                        Step::Derived(order.finish_shipment_recompute(shipment_number, revision, None)?.0)
                    }
                    RecomputePlan::Tax { request, revision } => Step::Tax(request, revision),
                }
            };

            let (totals, tax_refreshed) = match step {
                Step::Derived(totals) => (totals, false),
                Step::Tax(request, revision) => {
                    let result = self.call_tax(&request).await?;
                    let outcome = handle.lock().finish_shipment_recompute(
                        shipment_number,
                        revision,
                        Some((&request, &result)),
                    );
                    match outcome {
                        Ok(finished) => finished,
                        Err(LedgerError::StaleRecompute(_)) => {
                            tracing::warn!(
                                order_number = %order_number,
                                shipment_number = %shipment_number,
                                attempt,
                                "Shipment changed during tax call, re-planning"
                            );
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            tracing::debug!(
                order_number = %order_number,
                shipment_number = %shipment_number,
                subtotal = %totals.subtotal,
                total = %totals.total,
                tax_refreshed,
                "Shipment recomputed"
            );
            self.publish(
                order_number,
                LedgerEventPayload::ShipmentRecomputed {
                    shipment_number: shipment_number.to_string(),
                    subtotal: totals.subtotal,
                    total: totals.total,
                    tax_refreshed,
                },
            );
            return Ok(totals);
        }

        tracing::error!(order_number = %order_number, shipment_number = %shipment_number, max_attempts, "Recompute kept going stale");
        Err(LedgerError::StaleRecompute(shipment_number.to_string()))
    }

    /// Call the tax service with a per-attempt timeout and linear backoff
    ///
    /// Only transient failures and timeouts are retried.
    async fn call_tax(&self, request: &TaxRequest) -> LedgerResult<TaxResult> {
        let attempts = self.config.tax_retry_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.tax_timeout(), self.tax.calculate_taxes(request)).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) if !e.is_retryable() => {
                    tracing::error!(document_id = %request.document_id, error = %e, "Tax request rejected");
                    return Err(e.into());
                }
                Ok(Err(e)) => {
                    tracing::warn!(document_id = %request.document_id, attempt, error = %e, "Tax service failed");
                    last_error = Some(LedgerError::TaxService(e));
                }
                Err(_) => {
                    tracing::warn!(document_id = %request.document_id, attempt, "Tax service timed out");
                    last_error = Some(LedgerError::TaxTimeout(self.config.tax_timeout_ms));
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.tax_backoff(attempt)).await;
            }
        }
        tracing::error!(document_id = %request.document_id, attempts, "Tax service retries exhausted");
        Err(last_error.unwrap_or_else(|| LedgerError::Internal("tax service was never called".into())))
    }

    fn refresh_order_total(&self, handle: &OrderHandle, order_number: &str) {
        let (changed, exchange) = {
            let mut order = handle.lock();
            let changed = order.recompute_total();
            (changed, order.exchange().cloned())
        };
        let Some(total) = changed else {
            return;
        };
        tracing::debug!(order_number = %order_number, total = %total, "Order total changed");
        self.publish(order_number, LedgerEventPayload::OrderTotalChanged { total });

        // An exchange order's total is what the linked return settles against
        if let Some(link) = exchange {
            let result = self.with_order(&link.original_order, |original| {
                original.set_exchange_order_total(&link.rma_code, total)
            });
            if let Err(e) = result {
                tracing::warn!(order_number = %order_number, rma_code = %link.rma_code, error = %e, "Failed to update exchange total on return");
            }
        }
    }

    /// Read model of the order as of the last recompute
    pub fn current_totals(&self, order_number: &str) -> LedgerResult<OrderTotals> {
        self.with_order(order_number, |order| Ok(order.totals()))
    }

    // ========== Payments ==========

    pub fn record_payment(&self, order_number: &str, payment: PaymentRecord) -> LedgerResult<()> {
        let payment_id = payment.payment_id.clone();
        self.with_order(order_number, |order| order.record_payment(payment))?;
        tracing::info!(order_number = %order_number, payment_id = %payment_id, "Payment recorded");
        Ok(())
    }

    pub fn payment_summary(&self, order_number: &str) -> LedgerResult<PaymentSummary> {
        self.with_order(order_number, |order| Ok(order.payment_summary()))
    }

    // ========== Returns ==========

    /// Create a return against one shipment of the order
    ///
    /// The draft is validated before and again after the tax call, so a
    /// concurrent return cannot push the claimed quantity over the original.
    pub async fn initiate_return(
        &self,
        order_number: &str,
        shipment_number: &str,
        draft: ReturnDraft,
    ) -> LedgerResult<ReturnTotals> {
        let handle = self.handle(order_number)?;
        let tax_request = handle
            .lock()
            .prepare_return(shipment_number, &draft)?
            .tax_request();
        let result = self.call_tax(&tax_request).await?;
        validate_result(&tax_request, &result)?;

        let (totals, status) = handle
            .lock()
            .insert_return(shipment_number, &draft, Some(&result))?;
        tracing::info!(
            order_number = %order_number,
            shipment_number = %shipment_number,
            rma_code = %draft.rma_code,
            status = ?status,
            return_total = %totals.return_total,
            "Return initiated"
        );
        Ok(totals)
    }

    /// Replace the lines of an open return; taxes are re-prorated locally
    pub fn revise_return(
        &self,
        order_number: &str,
        rma_code: &str,
        lines: &[ReturnLineInput],
    ) -> LedgerResult<ReturnTotals> {
        let (totals, transition) =
            self.with_order(order_number, |order| order.revise_return(rma_code, lines))?;
        self.after_return_change(order_number, rma_code, transition);
        Ok(totals)
    }

    pub fn receive_return(
        &self,
        order_number: &str,
        rma_code: &str,
        line_item_id: &str,
        quantity: u32,
    ) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let transition = self.with_order(order_number, |order| {
            order.receive_return(rma_code, line_item_id, quantity)
        })?;
        self.after_return_change(order_number, rma_code, transition);
        Ok(transition)
    }

    /// No-op once the return is COMPLETED or CANCELLED
    pub fn update_return_status(&self, order_number: &str, rma_code: &str) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let transition = self.with_order(order_number, |order| order.update_return_status(rma_code))?;
        self.after_return_change(order_number, rma_code, transition);
        Ok(transition)
    }

    pub fn complete_return(&self, order_number: &str, rma_code: &str) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let transition = self.with_order(order_number, |order| order.complete_return(rma_code))?;
        self.after_return_change(order_number, rma_code, transition);
        Ok(transition)
    }

    /// Cancelling an exchange return also cancels its exchange order
    pub fn cancel_return(&self, order_number: &str, rma_code: &str) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let (transition, exchange_order) = self.with_order(order_number, |order| {
            let transition = order.cancel_return(rma_code)?;
            let exchange_order = order
                .return_request(rma_code)?
                .exchange_order_number()
                .map(str::to_string);
            Ok((transition, exchange_order))
        })?;
        self.after_return_change(order_number, rma_code, transition);

        if let (Some(_), Some(exchange_order)) = (transition, exchange_order) {
            match self.cancel(&exchange_order) {
                Ok(_) => tracing::info!(order_number = %exchange_order, rma_code = %rma_code, "Exchange order cancelled with its return"),
                Err(e) => tracing::warn!(order_number = %exchange_order, rma_code = %rma_code, error = %e, "Exchange order could not be cancelled"),
            }
        }
        Ok(transition)
    }

    pub fn refunded_total(&self, order_number: &str, rma_code: &str) -> LedgerResult<Money> {
        self.with_order(order_number, |order| order.refunded_total(rma_code))
    }

    pub fn owed_to_customer(&self, order_number: &str, rma_code: &str) -> LedgerResult<Money> {
        self.with_order(order_number, |order| order.owed_to_customer(rma_code))
    }

    /// Broadcast a return transition and mirror the return onto its exchange order
    fn after_return_change(
        &self,
        order_number: &str,
        rma_code: &str,
        transition: Option<Transition<ReturnStatus>>,
    ) {
        if let Some(t) = transition {
            tracing::info!(order_number = %order_number, rma_code = %rma_code, from = ?t.from, to = ?t.to, "Return status changed");
            self.publish(
                order_number,
                LedgerEventPayload::ReturnStatusChanged {
                    rma_code: rma_code.to_string(),
                    from: t.from,
                    to: t.to,
                },
            );
        }

        let linked = self.with_order(order_number, |order| {
            let request = order.return_request(rma_code)?;
            Ok(request
                .exchange_order_number()
                .map(|number| (number.to_string(), request.status(), request.totals().return_total)))
        });
        if let Ok(Some((exchange_order, status, return_total))) = linked {
            let result = self.with_order(&exchange_order, |order| order.sync_exchange(status, return_total));
            if let Err(e) = result {
                tracing::warn!(order_number = %exchange_order, rma_code = %rma_code, error = %e, "Failed to sync exchange order");
            }
        }
    }

    // ========== Exchange ==========

    /// Tie an exchange return on `original_order` to its replacement order
    ///
    /// The exchange order waits in AWAITING_EXCHANGE until the return completes.
    pub fn link_exchange(
        &self,
        original_order: &str,
        rma_code: &str,
        exchange_order: &str,
    ) -> LedgerResult<StatusChanges> {
        if original_order == exchange_order {
            return Err(LedgerError::InvalidOperation(format!(
                "order {} cannot be its own exchange",
                original_order
            )));
        }
        let exchange_total = self.with_order(exchange_order, |order| {
            if order.is_exchange_order() {
                return Err(LedgerError::InvalidOperation(format!(
                    "order {} is already an exchange",
                    order.number()
                )));
            }
            Ok(order.total())
        })?;
        let link = self.with_order(original_order, |order| {
            order.link_return_to_exchange(rma_code, exchange_order, exchange_total)
        })?;
        let changes = self.with_order(exchange_order, |order| {
            order.set_exchange_link(link);
            order.await_exchange()
        })?;
        tracing::info!(original_order = %original_order, rma_code = %rma_code, exchange_order = %exchange_order, "Exchange linked");
        self.publish_changes(exchange_order, &changes);
        Ok(changes)
    }

    /// Complete the linked return, release the exchange order and move its
    /// shipments off hold
    pub fn complete_exchange(&self, exchange_order: &str) -> LedgerResult<StatusChanges> {
        let link = self.with_order(exchange_order, |order| {
            let link = order
                .exchange()
                .cloned()
                .ok_or_else(|| LedgerError::ExchangeNotLinked(order.number().to_string()))?;
            if order.status() != OrderStatus::AwaitingExchange {
                return Err(LedgerError::InvalidOperation(format!(
                    "exchange order {} is not awaiting its exchange ({:?})",
                    order.number(),
                    order.status()
                )));
            }
            Ok(link)
        })?;

        self.complete_return(&link.original_order, &link.rma_code)?;

        let changes = self.with_order(exchange_order, |order| {
            let mut changes = order.release()?;
            changes.merge(order.assign_inventory()?);
            Ok(changes)
        })?;
        tracing::info!(exchange_order = %exchange_order, rma_code = %link.rma_code, "Exchange completed");
        self.publish_changes(exchange_order, &changes);
        Ok(changes)
    }

    // ========== Events ==========

    fn publish_changes(&self, order_number: &str, changes: &StatusChanges) {
        for (shipment_number, t) in &changes.shipments {
            tracing::info!(order_number = %order_number, shipment_number = %shipment_number, from = ?t.from, to = ?t.to, "Shipment status changed");
            self.publish(
                order_number,
                LedgerEventPayload::ShipmentStatusChanged {
                    shipment_number: shipment_number.clone(),
                    from: t.from,
                    to: t.to,
                },
            );
        }
        if let Some(t) = changes.order {
            tracing::info!(order_number = %order_number, from = ?t.from, to = ?t.to, "Order status changed");
            self.publish(
                order_number,
                LedgerEventPayload::OrderStatusChanged { from: t.from, to: t.to },
            );
        }
    }

    fn publish(&self, order_number: &str, payload: LedgerEventPayload) {
        let event = LedgerEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            order_number: order_number.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            payload,
        };
        if self.event_tx.send(event).is_err() {
            tracing::trace!(order_number = %order_number, "No ledger event subscribers");
        }
    }
}

#[cfg(test)]
mod tests;
