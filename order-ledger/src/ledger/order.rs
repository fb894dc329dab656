//! Order ledger
//!
//! The order owns its shipments (numbered `orderNumber-N` in creation
//! order), its payment records and the returns raised against it.
//!
//! # Status flow
//!
//! ```text
//! CREATED ──release──► IN_PROGRESS ◄──► PARTIALLY_SHIPPED ──► COMPLETED
//!    │  ▲                   │                                   ▲
//!  hold│ │release        (shipments)──────────────────────────────┘
//!    ▼  │
//!  ONHOLD        cancel ► CANCELLED (cascade)   fail ► FAILED (cascade)
//! ```
//!
//! Shipment-driven moves only happen while the order is IN_PROGRESS,
//! PARTIALLY_SHIPPED or COMPLETED, and never leave COMPLETED.

use super::error::{LedgerError, LedgerResult};
use super::line_item::{LineChange, LineItem};
use super::payment::{PaymentLedger, PaymentSummary};
use super::returns::{ReturnDraft, ReturnLine, ReturnLineInput, ReturnRequest, ReturnTotals};
use super::shipment::{effective_status, RecomputePlan, Shipment, ShipmentTotals};
use super::Transition;
use serde::{Deserialize, Serialize};
use shared::money::{Currency, Money, MoneyError};
use shared::order::{
    Address, OrderStatus, PaymentRecord, ReturnKind, ReturnStatus, ShipmentKind, ShipmentStatus,
    TaxRequest, TaxResult,
};
use std::collections::BTreeMap;

/// Status changes produced by one command, in the order they happened
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusChanges {
    pub shipments: Vec<(String, Transition<ShipmentStatus>)>,
    pub order: Option<Transition<OrderStatus>>,
}

impl StatusChanges {
    pub fn is_empty(&self) -> bool {
        self.shipments.is_empty() && self.order.is_none()
    }

    /// Append the changes of a later command
    pub fn merge(&mut self, later: StatusChanges) {
        self.shipments.extend(later.shipments);
        self.push_order(later.order);
    }

    fn push_shipment(&mut self, number: &str, transition: Option<Transition<ShipmentStatus>>) {
        if let Some(t) = transition {
            self.shipments.push((number.to_string(), t));
        }
    }

    /// Chain a further order transition onto the one already recorded
    fn push_order(&mut self, transition: Option<Transition<OrderStatus>>) {
        let Some(next) = transition else {
            return;
        };
        self.order = match self.order.take() {
            Some(first) if first.from == next.to => None,
            Some(first) => Some(Transition {
                from: first.from,
                to: next.to,
            }),
            None => Some(next),
        };
    }
}

/// Amount fields a caller may change on a line
#[derive(Debug, Clone, Default)]
pub struct LineItemUpdate {
    pub quantity: Option<u32>,
    pub unit_price: Option<Money>,
    pub discount: Option<Money>,
}

/// Held by an exchange order: the return on the original order it settles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeLink {
    pub original_order: String,
    pub rma_code: String,
    pub return_total: Money,
    pub return_status: ReturnStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentSummary {
    pub number: String,
    pub kind: ShipmentKind,
    pub status: ShipmentStatus,
    pub effective_status: ShipmentStatus,
    pub totals: ShipmentTotals,
}

/// Read model returned by `current_totals`
#[derive(Debug, Clone, Serialize)]
pub struct OrderTotals {
    pub order_number: String,
    pub status: OrderStatus,
    pub total: Money,
    pub adjusted_total: Money,
    pub total_tax: Money,
    pub total_before_tax: Money,
    pub shipments: Vec<ShipmentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    number: String,
    currency: Currency,
    status: OrderStatus,
    persisted: bool,
    shipments: Vec<Shipment>,
    #[serde(default)]
    payments: PaymentLedger,
    #[serde(default)]
    returns: Vec<ReturnRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exchange: Option<ExchangeLink>,
    total: Money,
    #[serde(skip)]
    recalculation_enabled: bool,
}

impl Order {
    pub fn new(number: impl Into<String>, currency: Currency) -> Self {
        Self {
            number: number.into(),
            currency,
            status: OrderStatus::Created,
            persisted: false,
            shipments: Vec::new(),
            payments: PaymentLedger::default(),
            returns: Vec::new(),
            exchange: None,
            total: Money::zero(currency),
            recalculation_enabled: true,
        }
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// Σ shipment totals as of the last recompute
    pub fn total(&self) -> Money {
        self.total
    }

    pub fn shipments(&self) -> &[Shipment] {
        &self.shipments
    }

    pub fn payments(&self) -> &PaymentLedger {
        &self.payments
    }

    pub fn returns(&self) -> &[ReturnRequest] {
        &self.returns
    }

    pub fn exchange(&self) -> Option<&ExchangeLink> {
        self.exchange.as_ref()
    }

    pub fn is_exchange_order(&self) -> bool {
        self.exchange.is_some()
    }

    fn shipment_index(&self, number: &str) -> LedgerResult<usize> {
        self.shipments
            .iter()
            .position(|s| s.number() == number)
            .ok_or_else(|| LedgerError::ShipmentNotFound(number.to_string()))
    }

    pub fn shipment(&self, number: &str) -> LedgerResult<&Shipment> {
        self.shipment_index(number).map(|idx| &self.shipments[idx])
    }

    pub fn effective_status(&self, number: &str) -> LedgerResult<ShipmentStatus> {
        self.shipment(number).map(|s| self.effective_of(s))
    }

    fn effective_of(&self, shipment: &Shipment) -> ShipmentStatus {
        effective_status(shipment.status(), Some(self.status))
    }

    // ========== Shipments and lines ==========

    /// Append a shipment numbered `<orderNumber>-<N>`
    pub fn add_shipment(&mut self, kind: ShipmentKind) -> LedgerResult<(String, Option<Transition<OrderStatus>>)> {
        if !self.persisted {
            return Err(LedgerError::OrderNotPersisted(self.number.clone()));
        }
        let number = format!("{}-{}", self.number, self.shipments.len() + 1);
        let mut shipment = Shipment::new(number.clone(), kind, self.currency);
        shipment.set_recalculation_enabled(true);
        self.shipments.push(shipment);
        Ok((number, self.update_status_from_shipments()))
    }

    pub fn add_line_item(&mut self, shipment_number: &str, item: LineItem) -> LedgerResult<StatusChanges> {
        let idx = self.shipment_index(shipment_number)?;
        self.shipments[idx].add_item(item)?;
        Ok(self.after_allocation_change(idx))
    }

    /// Returns the removed line ids (the line and its bundle children)
    pub fn remove_line_item(
        &mut self,
        shipment_number: &str,
        line_item_id: &str,
    ) -> LedgerResult<(Vec<String>, StatusChanges)> {
        let idx = self.shipment_index(shipment_number)?;
        let removed = self.shipments[idx].remove_item(line_item_id)?;
        Ok((removed, self.after_allocation_change(idx)))
    }

    pub fn update_line_item(
        &mut self,
        shipment_number: &str,
        line_item_id: &str,
        update: &LineItemUpdate,
    ) -> LedgerResult<(Option<LineChange>, StatusChanges)> {
        let idx = self.shipment_index(shipment_number)?;
        let change = self.shipments[idx].update_item(line_item_id, |item| {
            let changes = [
                update.quantity.and_then(|q| item.set_quantity(q)),
                update.unit_price.and_then(|p| item.set_unit_price(p)),
                update.discount.and_then(|d| item.set_discount(d)),
            ];
            changes
                .into_iter()
                .flatten()
                .max_by_key(|c| *c == LineChange::Amount)
        })?;
        Ok((change, self.after_allocation_change(idx)))
    }

    pub fn set_allocated_quantity(
        &mut self,
        shipment_number: &str,
        line_item_id: &str,
        allocated_quantity: u32,
    ) -> LedgerResult<StatusChanges> {
        self.allocation_command(shipment_number, line_item_id, |item| {
            item.set_allocated_quantity(allocated_quantity)
        })
    }

    /// Quantity allocated by an order change, counted toward `is_allocated`
    pub fn set_changed_quantity_allocated(
        &mut self,
        shipment_number: &str,
        line_item_id: &str,
        quantity: u32,
    ) -> LedgerResult<StatusChanges> {
        self.allocation_command(shipment_number, line_item_id, |item| {
            item.set_changed_quantity_allocated(quantity)
        })
    }

    fn allocation_command<F>(
        &mut self,
        shipment_number: &str,
        line_item_id: &str,
        mutate: F,
    ) -> LedgerResult<StatusChanges>
    where
        F: FnOnce(&mut LineItem) -> Option<LineChange>,
    {
        let idx = self.shipment_index(shipment_number)?;
        let change = self.shipments[idx].update_item(line_item_id, mutate)?;
        if change.is_none() {
            return Ok(StatusChanges::default());
        }
        Ok(self.after_allocation_change(idx))
    }

    fn after_allocation_change(&mut self, idx: usize) -> StatusChanges {
        let mut changes = StatusChanges::default();
        let transition = self.shipments[idx].reevaluate_allocation();
        changes.push_shipment(self.shipments[idx].number(), transition);
        if transition.is_some() {
            changes.push_order(self.update_status_from_shipments());
        }
        changes
    }

    pub fn set_shipping_cost(&mut self, shipment_number: &str, cost: Money) -> LedgerResult<bool> {
        let idx = self.shipment_index(shipment_number)?;
        self.shipments[idx].set_shipping_cost(cost)
    }

    pub fn set_subtotal_discount(&mut self, shipment_number: &str, discount: Money) -> LedgerResult<bool> {
        let idx = self.shipment_index(shipment_number)?;
        self.shipments[idx].set_subtotal_discount(discount)
    }

    pub fn set_shipping_address(&mut self, shipment_number: &str, address: Address) -> LedgerResult<bool> {
        let idx = self.shipment_index(shipment_number)?;
        Ok(self.shipments[idx].set_address(address))
    }

    // ========== Shipment status commands ==========

    /// Checkout: move every shipment still on hold to its inventory status
    pub fn assign_inventory(&mut self) -> LedgerResult<StatusChanges> {
        let mut changes = StatusChanges::default();
        for shipment in &mut self.shipments {
            let status = shipment.status();
            if status == ShipmentStatus::OnHold || status.is_allocation_driven() {
                let transition = shipment.assign_inventory_status()?;
                changes.push_shipment(shipment.number(), transition);
            }
        }
        changes.push_order(self.update_status_from_shipments());
        Ok(changes)
    }

    pub fn release_shipment(&mut self, shipment_number: &str) -> LedgerResult<StatusChanges> {
        self.shipment_command(shipment_number, Shipment::release)
    }

    pub fn complete_shipment(&mut self, shipment_number: &str) -> LedgerResult<StatusChanges> {
        self.shipment_command(shipment_number, Shipment::complete)
    }

    pub fn cancel_shipment(&mut self, shipment_number: &str) -> LedgerResult<StatusChanges> {
        self.shipment_command(shipment_number, Shipment::cancel)
    }

    fn shipment_command<F>(&mut self, shipment_number: &str, command: F) -> LedgerResult<StatusChanges>
    where
        F: FnOnce(&mut Shipment, ShipmentStatus) -> LedgerResult<Option<Transition<ShipmentStatus>>>,
    {
        let idx = self.shipment_index(shipment_number)?;
        let effective = self.effective_of(&self.shipments[idx]);
        let transition = command(&mut self.shipments[idx], effective)?;
        let mut changes = StatusChanges::default();
        changes.push_shipment(shipment_number, transition);
        if transition.is_some() {
            changes.push_order(self.update_status_from_shipments());
        }
        Ok(changes)
    }

    // ========== Order status commands ==========

    pub fn is_cancellable(&self) -> bool {
        let has_electronic = self
            .shipments
            .iter()
            .any(|s| s.kind() == ShipmentKind::Electronic);
        if has_electronic && self.status != OrderStatus::OnHold {
            return false;
        }
        matches!(
            self.status,
            OrderStatus::Created
                | OrderStatus::InProgress
                | OrderStatus::OnHold
                | OrderStatus::AwaitingExchange
        )
    }

    pub fn is_holdable(&self) -> bool {
        self.status == OrderStatus::Created
    }

    pub fn is_releasable(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Created | OrderStatus::AwaitingExchange | OrderStatus::OnHold
        )
    }

    /// Any shipment already shipped can be refunded against
    pub fn is_refundable(&self) -> bool {
        self.shipments
            .iter()
            .any(|s| self.effective_of(s) == ShipmentStatus::Shipped)
    }

    pub fn hold(&mut self) -> LedgerResult<StatusChanges> {
        self.guarded(Self::is_holdable, "held", |order| {
            let mut changes = StatusChanges::default();
            changes.push_order(order.transition_to(OrderStatus::OnHold));
            changes
        })
    }

    pub fn release(&mut self) -> LedgerResult<StatusChanges> {
        self.guarded(Self::is_releasable, "released", |order| {
            let mut changes = StatusChanges::default();
            changes.push_order(order.transition_to(OrderStatus::InProgress));
            changes.push_order(order.update_status_from_shipments());
            changes
        })
    }

    /// Cancel the order and every shipment that is not already final
    pub fn cancel(&mut self) -> LedgerResult<StatusChanges> {
        self.guarded(Self::is_cancellable, "cancelled", |order| {
            order.cascade(OrderStatus::Cancelled, ShipmentStatus::Cancelled)
        })
    }

    /// Fail the order and every shipment that is not already final
    pub fn fail(&mut self) -> LedgerResult<StatusChanges> {
        self.guarded(|_| true, "failed", |order| {
            order.cascade(OrderStatus::Failed, ShipmentStatus::Failed)
        })
    }

    pub fn await_exchange(&mut self) -> LedgerResult<StatusChanges> {
        self.guarded(|_| true, "set to await an exchange", |order| {
            let mut changes = StatusChanges::default();
            changes.push_order(order.transition_to(OrderStatus::AwaitingExchange));
            changes
        })
    }

    /// Terminal orders ignore commands; otherwise `allowed` must hold
    fn guarded<P, F>(&mut self, allowed: P, verb: &str, apply: F) -> LedgerResult<StatusChanges>
    where
        P: FnOnce(&Self) -> bool,
        F: FnOnce(&mut Self) -> StatusChanges,
    {
        if self.status.is_terminal() {
            tracing::debug!(order_number = %self.number, status = ?self.status, "Command ignored on terminal order");
            return Ok(StatusChanges::default());
        }
        if !allowed(&*self) {
            return Err(LedgerError::InvalidOperation(format!(
                "order {} cannot be {} from {:?}",
                self.number, verb, self.status
            )));
        }
        Ok(apply(self))
    }

    fn cascade(&mut self, order_status: OrderStatus, shipment_status: ShipmentStatus) -> StatusChanges {
        let mut changes = StatusChanges::default();
        for shipment in &mut self.shipments {
            if !shipment.status().is_terminal() {
                let transition = shipment.force_status(shipment_status);
                changes.push_shipment(shipment.number(), transition);
            }
        }
        changes.push_order(self.transition_to(order_status));
        changes
    }

    fn transition_to(&mut self, target: OrderStatus) -> Option<Transition<OrderStatus>> {
        if self.status == target {
            return None;
        }
        let from = std::mem::replace(&mut self.status, target);
        Some(Transition { from, to: target })
    }

    /// Derive the order status from the effective shipment statuses
    pub fn update_status_from_shipments(&mut self) -> Option<Transition<OrderStatus>> {
        if !self.status.follows_shipments() || self.shipments.is_empty() {
            return None;
        }
        let count = self.shipments.len();
        let (mut shipped, mut cancelled) = (0, 0);
        for shipment in &self.shipments {
            match self.effective_of(shipment) {
                ShipmentStatus::Shipped => shipped += 1,
                ShipmentStatus::Cancelled => cancelled += 1,
                _ => {}
            }
        }
        let target = if shipped == count {
            OrderStatus::Completed
        } else if cancelled == count {
            OrderStatus::Cancelled
        } else if shipped + cancelled == count {
            OrderStatus::Completed
        } else if shipped > 0 {
            OrderStatus::PartiallyShipped
        } else {
            OrderStatus::InProgress
        };
        if self.status == OrderStatus::Completed && target != OrderStatus::Completed {
            return None;
        }
        self.transition_to(target)
    }

    // ========== Recalculation ==========

    pub fn is_recalculation_enabled(&self) -> bool {
        self.recalculation_enabled
    }

    pub(crate) fn set_recalculation_enabled(&mut self, enabled: bool) {
        self.recalculation_enabled = enabled;
        for shipment in &mut self.shipments {
            shipment.set_recalculation_enabled(enabled);
        }
    }

    pub(crate) fn plan_shipment_recompute(&mut self, shipment_number: &str) -> LedgerResult<RecomputePlan> {
        let idx = self.shipment_index(shipment_number)?;
        let effective = self.effective_of(&self.shipments[idx]);
        Ok(self.shipments[idx].plan_recompute(effective))
    }

    /// Apply a recompute planned at `revision`; fails with `StaleRecompute`
    /// when the shipment changed in between
    ///
    /// A tax result is dropped when the shipment's tax froze or recalculation
    /// was disabled while the call was in flight. The flag tells whether the
    /// result was applied.
    pub(crate) fn finish_shipment_recompute(
        &mut self,
        shipment_number: &str,
        revision: u64,
        tax: Option<(&TaxRequest, &TaxResult)>,
    ) -> LedgerResult<(ShipmentTotals, bool)> {
        let idx = self.shipment_index(shipment_number)?;
        let effective = self.effective_of(&self.shipments[idx]);
        let shipment = &mut self.shipments[idx];
        if shipment.revision() != revision {
            return Err(LedgerError::StaleRecompute(shipment_number.to_string()));
        }
        if !shipment.is_recalculation_enabled() {
            return Ok((shipment.totals(), false));
        }
        let mut applied = false;
        if let Some((request, result)) = tax {
            if shipment.tax_recalculation_required(effective) {
                shipment.apply_tax(request, result)?;
                applied = true;
            } else {
                tracing::debug!(
                    order_number = %self.number,
                    shipment_number = %shipment_number,
                    status = ?effective,
                    "Tax frozen during the call, result dropped"
                );
            }
        }
        Ok((shipment.finish_recompute(), applied))
    }

    /// `total = Σ shipment.total`, cancelled shipments included
    ///
    /// Returns the new total when it changed.
    pub fn recompute_total(&mut self) -> Option<Money> {
        if !self.recalculation_enabled {
            return None;
        }
        let total = Money::sum(self.currency, self.shipments.iter().map(|s| s.totals().total));
        if total == self.total {
            return None;
        }
        self.total = total;
        Some(total)
    }

    pub fn totals(&self) -> OrderTotals {
        OrderTotals {
            order_number: self.number.clone(),
            status: self.status,
            total: self.total,
            adjusted_total: self.adjusted_total(),
            total_tax: self.total_tax(),
            total_before_tax: self.total_before_tax(),
            shipments: self
                .shipments
                .iter()
                .map(|s| ShipmentSummary {
                    number: s.number().to_string(),
                    kind: s.kind(),
                    status: s.status(),
                    effective_status: self.effective_of(s),
                    totals: s.totals(),
                })
                .collect(),
        }
    }

    // ========== Aggregates ==========

    fn sum_shipments<F>(&self, field: F) -> Money
    where
        F: Fn(&ShipmentTotals) -> Money,
    {
        Money::sum(self.currency, self.shipments.iter().map(|s| field(&s.totals())))
    }

    pub fn subtotal(&self) -> Money {
        self.sum_shipments(|t| t.subtotal)
    }

    pub fn subtotal_discount(&self) -> Money {
        self.sum_shipments(|t| t.subtotal_discount)
    }

    pub fn total_tax(&self) -> Money {
        self.sum_shipments(|t| t.total_tax)
    }

    pub fn total_item_tax(&self) -> Money {
        self.sum_shipments(|t| t.item_tax)
    }

    pub fn total_shipping_cost(&self) -> Money {
        self.sum_shipments(|t| t.shipping_cost)
    }

    pub fn total_before_tax_shipping_cost(&self) -> Money {
        self.sum_shipments(|t| t.before_tax_shipping_cost)
    }

    pub fn total_shipping_tax(&self) -> Money {
        self.sum_shipments(|t| t.shipping_tax)
    }

    pub fn total_before_tax(&self) -> Money {
        self.total - self.total_tax()
    }

    pub fn tax_totals_by_category(&self) -> BTreeMap<String, Money> {
        let mut totals: BTreeMap<String, Money> = BTreeMap::new();
        for value in self.shipments.iter().flat_map(Shipment::tax_values) {
            *totals
                .entry(value.name.clone())
                .or_insert_with(|| Money::zero(self.currency)) += value.amount;
        }
        totals
    }

    /// Total less the totals of cancelled shipments
    pub fn adjusted_total(&self) -> Money {
        let cancelled = Money::sum(
            self.currency,
            self.shipments
                .iter()
                .filter(|s| s.status() == ShipmentStatus::Cancelled)
                .map(|s| s.totals().total),
        );
        self.total - cancelled
    }

    /// Amount of shipments not yet shipped or cancelled
    pub fn future_shipment_amount(&self) -> Money {
        Money::sum(
            self.currency,
            self.shipments
                .iter()
                .filter(|s| {
                    !matches!(
                        self.effective_of(s),
                        ShipmentStatus::Shipped | ShipmentStatus::Cancelled
                    )
                })
                .map(|s| s.totals().total),
        )
    }

    // ========== Payments and balance ==========

    pub fn record_payment(&mut self, payment: PaymentRecord) -> LedgerResult<()> {
        self.payments.record(self.currency, payment)
    }

    /// Return total still owed through a pending exchange
    pub fn due_to_rma(&self) -> Money {
        match &self.exchange {
            Some(link) if !link.return_status.is_terminal() => link.return_total,
            _ => Money::zero(self.currency),
        }
    }

    pub fn payment_summary(&self) -> PaymentSummary {
        let captured = self.payments.captured(self.currency);
        let credited = self.payments.credited(self.currency);
        let paid = captured - credited;
        let adjusted_total = self.adjusted_total();
        let due_to_rma = self.due_to_rma();
        let outstanding = adjusted_total - paid;
        let balance = if self.is_exchange_order() {
            (outstanding - due_to_rma).max_zero()
        } else {
            outstanding
        };
        PaymentSummary {
            captured,
            credited,
            paid,
            adjusted_total,
            due_to_rma,
            balance,
        }
    }

    // ========== Returns ==========

    fn return_index(&self, rma_code: &str) -> LedgerResult<usize> {
        self.returns
            .iter()
            .position(|r| r.rma_code() == rma_code)
            .ok_or_else(|| LedgerError::ReturnNotFound(rma_code.to_string()))
    }

    pub fn return_request(&self, rma_code: &str) -> LedgerResult<&ReturnRequest> {
        self.return_index(rma_code).map(|idx| &self.returns[idx])
    }

    /// Original quantity less what other non-cancelled returns already claim
    pub fn remaining_returnable(
        &self,
        shipment_number: &str,
        line_item_id: &str,
        exclude_rma: Option<&str>,
    ) -> LedgerResult<u32> {
        let original = self.shipment(shipment_number)?.item(line_item_id)?.quantity();
        let claimed: u32 = self
            .returns
            .iter()
            .filter(|r| r.shipment_number() == shipment_number && Some(r.rma_code()) != exclude_rma)
            .map(|r| r.claimed_quantity(line_item_id))
            .sum();
        Ok(original.saturating_sub(claimed))
    }

    fn build_return_lines(
        &self,
        rma_code: &str,
        shipment_number: &str,
        inputs: &[ReturnLineInput],
        exclude_rma: Option<&str>,
    ) -> LedgerResult<Vec<ReturnLine>> {
        let shipment = self.shipment(shipment_number)?;

        // Same line listed twice counts once with the summed quantity
        let mut requested: BTreeMap<&str, u32> = BTreeMap::new();
        for input in inputs {
            *requested.entry(input.line_item_id.as_str()).or_default() += input.quantity;
        }

        let mut lines = Vec::with_capacity(requested.len());
        for (line_item_id, quantity) in requested {
            if !shipment.contains_item(line_item_id) {
                return Err(match self.shipments.iter().find(|s| s.contains_item(line_item_id)) {
                    Some(other) => LedgerError::ReturnSpansShipments {
                        rma_code: rma_code.to_string(),
                        expected: shipment_number.to_string(),
                        found: other.number().to_string(),
                    },
                    None => LedgerError::LineItemNotFound(line_item_id.to_string()),
                });
            }
            let remaining = self.remaining_returnable(shipment_number, line_item_id, exclude_rma)?;
            if quantity > remaining {
                return Err(LedgerError::ReturnQuantityExceeded {
                    line_item_id: line_item_id.to_string(),
                    requested: quantity,
                    remaining,
                });
            }
            let item = shipment.item(line_item_id)?;
            lines.push(ReturnLine {
                line_item_id: line_item_id.to_string(),
                sku_code: item.sku_code().to_string(),
                quantity,
                received_quantity: 0,
                original_quantity: item.quantity(),
                unit_price: item.unit_price_less_discount(),
                original_tax: item.tax(),
                tax: Money::zero(self.currency),
            });
        }
        Ok(lines)
    }

    /// Validate a draft and build the return without storing it
    pub(crate) fn prepare_return(&self, shipment_number: &str, draft: &ReturnDraft) -> LedgerResult<ReturnRequest> {
        if self.returns.iter().any(|r| r.rma_code() == draft.rma_code) {
            return Err(LedgerError::InvalidOperation(format!(
                "return {} already exists",
                draft.rma_code
            )));
        }
        for amount in [draft.shipping_cost, draft.shipment_discount, draft.less_restock_amount]
            .into_iter()
            .flatten()
        {
            if amount.currency() != self.currency {
                return Err(MoneyError::CurrencyMismatch {
                    left: self.currency,
                    right: amount.currency(),
                }
                .into());
            }
        }
        let lines = self.build_return_lines(&draft.rma_code, shipment_number, &draft.lines, None)?;
        ensure_something_to_return(&draft.rma_code, &lines)?;
        let shipment = self.shipment(shipment_number)?;
        Ok(ReturnRequest::new(
            draft,
            shipment_number,
            self.currency,
            shipment.is_inclusive_tax(),
            lines,
        ))
    }

    /// Validate again against the current state, apply the tax result and store
    pub(crate) fn insert_return(
        &mut self,
        shipment_number: &str,
        draft: &ReturnDraft,
        tax: Option<&TaxResult>,
    ) -> LedgerResult<(ReturnTotals, ReturnStatus)> {
        let mut request = self.prepare_return(shipment_number, draft)?;
        let totals = match tax {
            Some(result) => request.apply_tax(result),
            None => request.totals(),
        };
        let status = request.status();
        self.returns.push(request);
        self.refresh_returnable_quantities(shipment_number)?;
        Ok((totals, status))
    }

    /// Replace the lines of an open return
    pub fn revise_return(
        &mut self,
        rma_code: &str,
        inputs: &[ReturnLineInput],
    ) -> LedgerResult<(ReturnTotals, Option<Transition<ReturnStatus>>)> {
        let idx = self.return_index(rma_code)?;
        if self.returns[idx].is_in_terminal_state() {
            return Err(LedgerError::ReturnClosed(rma_code.to_string()));
        }
        let shipment_number = self.returns[idx].shipment_number().to_string();
        let mut lines = self.build_return_lines(rma_code, &shipment_number, inputs, Some(rma_code))?;
        ensure_something_to_return(rma_code, &lines)?;
        for line in &mut lines {
            if let Some(previous) = self.returns[idx]
                .lines()
                .iter()
                .find(|l| l.line_item_id == line.line_item_id)
            {
                line.received_quantity = previous.received_quantity.min(line.quantity);
            }
        }
        self.returns[idx].replace_lines(lines)?;
        let transition = self.returns[idx].update_status();
        self.refresh_returnable_quantities(&shipment_number)?;
        Ok((self.returns[idx].totals(), transition))
    }

    fn refresh_returnable_quantities(&mut self, shipment_number: &str) -> LedgerResult<()> {
        let shipment = self.shipment(shipment_number)?;
        let mut remaining = Vec::new();
        for item in shipment.items() {
            remaining.push((
                item.id().to_string(),
                self.remaining_returnable(shipment_number, item.id(), None)?,
            ));
        }
        let idx = self.shipment_index(shipment_number)?;
        for (line_item_id, quantity) in remaining {
            self.shipments[idx]
                .item_mut(&line_item_id)?
                .set_returnable_quantity(quantity);
        }
        Ok(())
    }

    pub fn receive_return(
        &mut self,
        rma_code: &str,
        line_item_id: &str,
        quantity: u32,
    ) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let idx = self.return_index(rma_code)?;
        self.returns[idx].receive(line_item_id, quantity)
    }

    pub fn update_return_status(&mut self, rma_code: &str) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let idx = self.return_index(rma_code)?;
        Ok(self.returns[idx].update_status())
    }

    pub fn complete_return(&mut self, rma_code: &str) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let idx = self.return_index(rma_code)?;
        Ok(self.returns[idx].complete())
    }

    pub fn cancel_return(&mut self, rma_code: &str) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        let idx = self.return_index(rma_code)?;
        let transition = self.returns[idx].cancel()?;
        if transition.is_some() {
            let shipment_number = self.returns[idx].shipment_number().to_string();
            self.refresh_returnable_quantities(&shipment_number)?;
        }
        Ok(transition)
    }

    /// Approved credits issued against the return
    pub fn refunded_total(&self, rma_code: &str) -> LedgerResult<Money> {
        self.return_index(rma_code)?;
        Ok(self.payments.credited_for_return(self.currency, rma_code))
    }

    pub fn owed_to_customer(&self, rma_code: &str) -> LedgerResult<Money> {
        let refunded = self.refunded_total(rma_code)?;
        Ok(self.return_request(rma_code)?.owed_to_customer(refunded))
    }

    // ========== Exchange ==========

    /// On the original order: tie an exchange return to its replacement order
    pub(crate) fn link_return_to_exchange(
        &mut self,
        rma_code: &str,
        exchange_order: &str,
        exchange_total: Money,
    ) -> LedgerResult<ExchangeLink> {
        let idx = self.return_index(rma_code)?;
        let request = &mut self.returns[idx];
        if request.kind() != ReturnKind::Exchange {
            return Err(LedgerError::InvalidOperation(format!(
                "return {} is not an exchange",
                rma_code
            )));
        }
        if request.is_in_terminal_state() {
            return Err(LedgerError::ReturnClosed(rma_code.to_string()));
        }
        request.link_exchange_order(exchange_order, exchange_total);
        Ok(ExchangeLink {
            original_order: self.number.clone(),
            rma_code: rma_code.to_string(),
            return_total: request.totals().return_total,
            return_status: request.status(),
        })
    }

    /// On the original order: refresh the replacement order total seen by the return
    pub(crate) fn set_exchange_order_total(&mut self, rma_code: &str, total: Money) -> LedgerResult<()> {
        let idx = self.return_index(rma_code)?;
        self.returns[idx].set_exchange_order_total(total);
        Ok(())
    }

    /// On the exchange order
    pub(crate) fn set_exchange_link(&mut self, link: ExchangeLink) {
        self.exchange = Some(link);
    }

    /// On the exchange order: mirror the state of the linked return
    pub(crate) fn sync_exchange(&mut self, return_status: ReturnStatus, return_total: Money) -> LedgerResult<()> {
        let link = self
            .exchange
            .as_mut()
            .ok_or_else(|| LedgerError::ExchangeNotLinked(self.number.clone()))?;
        link.return_status = return_status;
        link.return_total = return_total;
        Ok(())
    }
}

fn ensure_something_to_return(rma_code: &str, lines: &[ReturnLine]) -> LedgerResult<()> {
    if lines.iter().all(|l| l.quantity == 0) {
        return Err(LedgerError::InvalidOperation(format!(
            "return {} has nothing to return",
            rma_code
        )));
    }
    Ok(())
}
