//! Shipment ledger
//!
//! A shipment aggregates the line items fulfilled together. It carries two
//! kinds of state:
//!
//! - persistent amounts (`item_subtotal`, `item_tax`, `shipping_tax`,
//!   `inclusive_tax`, tax values) written only by a recompute pass
//! - the stored fulfilment status; callers observe [`effective_status`],
//!   which layers the owning order's hold/cancel on top
//!
//! Totals are always derived from the persistent amounts by [`Shipment::totals`].

use super::error::{LedgerError, LedgerResult};
use super::line_item::{LineChange, LineItem};
use super::tax::validate_result;
use super::Transition;
use serde::{Deserialize, Serialize};
use shared::money::{Currency, Money, MoneyError};
use shared::order::{
    Address, OrderStatus, ShipmentKind, ShipmentStatus, TaxCategoryAmount, TaxDocumentKind,
    TaxLine, TaxRequest, TaxResult,
};
use std::collections::BTreeMap;

/// Status a caller observes once the order-level override is applied
///
/// A stored CANCELLED always wins; otherwise an order on hold forces
/// ON_HOLD and a cancelled order forces CANCELLED.
pub fn effective_status(stored: ShipmentStatus, order_status: Option<OrderStatus>) -> ShipmentStatus {
    match (stored, order_status) {
        (ShipmentStatus::Cancelled, _) => ShipmentStatus::Cancelled,
        (_, Some(OrderStatus::OnHold)) => ShipmentStatus::OnHold,
        (_, Some(OrderStatus::Cancelled)) => ShipmentStatus::Cancelled,
        (stored, _) => stored,
    }
}

/// Derived shipment figures
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShipmentTotals {
    pub subtotal: Money,
    pub subtotal_discount: Money,
    pub subtotal_before_tax: Money,
    pub item_tax: Money,
    pub shipping_cost: Money,
    pub before_tax_shipping_cost: Money,
    pub shipping_tax: Money,
    pub total_tax: Money,
    pub total: Money,
    pub total_before_tax: Money,
}

impl ShipmentTotals {
    fn zero(currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            subtotal: zero,
            subtotal_discount: zero,
            subtotal_before_tax: zero,
            item_tax: zero,
            shipping_cost: zero,
            before_tax_shipping_cost: zero,
            shipping_tax: zero,
            total_tax: zero,
            total: zero,
            total_before_tax: zero,
        }
    }
}

/// What a recompute pass has to do for a shipment
#[derive(Debug, Clone)]
pub enum RecomputePlan {
    /// Recalculation is switched off (hydration, failed shipment)
    Disabled,
    /// Refresh the subtotal and totals, keep the last tax result
    DeriveOnly { revision: u64 },
    /// Ask the tax service first
    Tax { request: TaxRequest, revision: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    number: String,
    kind: ShipmentKind,
    status: ShipmentStatus,
    currency: Currency,
    items: BTreeMap<String, LineItem>,
    /// Lines taken out of the shipment (with their bundle children)
    #[serde(default)]
    removed_items: Vec<LineItem>,
    shipping_cost: Money,
    subtotal_discount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<Address>,
    item_subtotal: Money,
    item_tax: Money,
    shipping_tax: Money,
    inclusive_tax: bool,
    #[serde(default)]
    tax_values: BTreeMap<String, TaxCategoryAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tax_document_id: Option<String>,
    #[serde(skip)]
    recalculation_enabled: bool,
    #[serde(skip)]
    revision: u64,
    #[serde(skip)]
    amounts_dirty: bool,
}

impl Shipment {
    pub(crate) fn new(number: impl Into<String>, kind: ShipmentKind, currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            number: number.into(),
            kind,
            status: ShipmentStatus::OnHold,
            currency,
            items: BTreeMap::new(),
            removed_items: Vec::new(),
            shipping_cost: zero,
            subtotal_discount: zero,
            address: None,
            item_subtotal: zero,
            item_tax: zero,
            shipping_tax: zero,
            inclusive_tax: false,
            tax_values: BTreeMap::new(),
            tax_document_id: None,
            recalculation_enabled: false,
            revision: 0,
            amounts_dirty: false,
        }
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn kind(&self) -> ShipmentKind {
        self.kind
    }

    /// Stored status; see [`effective_status`] for what callers observe
    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_inclusive_tax(&self) -> bool {
        self.inclusive_tax
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn tax_values(&self) -> impl Iterator<Item = &TaxCategoryAmount> {
        self.tax_values.values()
    }

    pub fn items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.values()
    }

    pub fn removed_items(&self) -> &[LineItem] {
        &self.removed_items
    }

    pub fn item(&self, id: &str) -> LedgerResult<&LineItem> {
        self.items
            .get(id)
            .ok_or_else(|| LedgerError::LineItemNotFound(id.to_string()))
    }

    pub fn contains_item(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Lines changed since the last recompute
    pub fn needs_recompute(&self) -> bool {
        self.amounts_dirty || self.items.values().any(LineItem::is_amount_dirty)
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.amounts_dirty = true;
    }

    fn check_currency(&self, currencies: impl IntoIterator<Item = Currency>) -> LedgerResult<()> {
        for currency in currencies {
            if currency != self.currency {
                return Err(MoneyError::CurrencyMismatch {
                    left: self.currency,
                    right: currency,
                }
                .into());
            }
        }
        Ok(())
    }

    // ========== Line items ==========

    /// Add a line; a bundle parent must already be in this shipment
    pub fn add_item(&mut self, item: LineItem) -> LedgerResult<()> {
        self.check_currency(item.currencies())?;
        if self.items.contains_key(item.id()) {
            return Err(LedgerError::InvalidOperation(format!(
                "line item {} already exists on shipment {}",
                item.id(),
                self.number
            )));
        }
        if let Some(parent) = item.parent()
            && !self.items.contains_key(parent)
        {
            return Err(LedgerError::InvalidBundle(format!(
                "parent {} of line {} is not on shipment {}",
                parent,
                item.id(),
                self.number
            )));
        }
        self.items.insert(item.id().to_string(), item);
        self.touch();
        Ok(())
    }

    /// Remove a line and every line below it in its bundle tree
    ///
    /// Removed lines are kept in the removed set. Returns the removed ids.
    pub fn remove_item(&mut self, id: &str) -> LedgerResult<Vec<String>> {
        self.item(id)?;
        let doomed: Vec<String> = self
            .items
            .keys()
            .filter(|candidate| self.descends_from(candidate, id))
            .cloned()
            .collect();
        for line_id in &doomed {
            if let Some(item) = self.items.remove(line_id) {
                self.removed_items.push(item);
            }
        }
        self.touch();
        Ok(doomed)
    }

    fn descends_from(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = Some(candidate);
        // Parents are inserted before children, so a chain never exceeds the item count
        for _ in 0..=self.items.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.items.get(id).and_then(LineItem::parent),
                None => return false,
            }
        }
        false
    }

    /// Walk `parent` links up to the bundle root
    pub fn root_of(&self, id: &str) -> LedgerResult<&LineItem> {
        let mut item = self.item(id)?;
        for _ in 0..self.items.len() {
            match item.parent() {
                Some(parent) => item = self.item(parent)?,
                None => return Ok(item),
            }
        }
        Err(LedgerError::InvalidBundle(format!(
            "line {} does not resolve to a root",
            id
        )))
    }

    /// Apply a mutation to one line; amount changes invalidate the totals
    pub fn update_item<F>(&mut self, id: &str, mutate: F) -> LedgerResult<Option<LineChange>>
    where
        F: FnOnce(&mut LineItem) -> Option<LineChange>,
    {
        let mut updated = self.item(id)?.clone();
        let change = mutate(&mut updated);
        self.check_currency(updated.currencies())?;
        self.items.insert(id.to_string(), updated);
        // Allocation changes leave the revision alone
        if change == Some(LineChange::Amount) {
            self.touch();
        }
        Ok(change)
    }

    pub(crate) fn item_mut(&mut self, id: &str) -> LedgerResult<&mut LineItem> {
        self.items
            .get_mut(id)
            .ok_or_else(|| LedgerError::LineItemNotFound(id.to_string()))
    }

    // ========== Shipment-level amounts ==========

    pub fn set_shipping_cost(&mut self, cost: Money) -> LedgerResult<bool> {
        if self.kind != ShipmentKind::Physical {
            return Err(LedgerError::InvalidOperation(format!(
                "shipment {} has no shipping cost",
                self.number
            )));
        }
        self.check_currency([cost.currency()])?;
        if self.shipping_cost == cost {
            return Ok(false);
        }
        self.shipping_cost = cost;
        self.touch();
        Ok(true)
    }

    pub fn set_subtotal_discount(&mut self, discount: Money) -> LedgerResult<bool> {
        self.check_currency([discount.currency()])?;
        if self.subtotal_discount == discount {
            return Ok(false);
        }
        self.subtotal_discount = discount;
        self.touch();
        Ok(true)
    }

    pub fn has_subtotal_discount(&self) -> bool {
        !self.subtotal_discount.is_zero()
    }

    pub fn set_address(&mut self, address: Address) -> bool {
        if self.address.as_ref() == Some(&address) {
            return false;
        }
        self.address = Some(address);
        self.touch();
        true
    }

    // ========== Status ==========

    /// Move between AWAITING_INVENTORY and INVENTORY_ASSIGNED by allocation
    ///
    /// Only fires while the stored status is one of those two states.
    pub fn reevaluate_allocation(&mut self) -> Option<Transition<ShipmentStatus>> {
        for item in self.items.values_mut() {
            item.clear_allocation_dirty();
        }
        if !self.status.is_allocation_driven() {
            return None;
        }
        let target = self.allocation_target();
        self.transition_to(target)
    }

    /// Leave ON_HOLD at checkout: pick the inventory status from allocation
    pub fn assign_inventory_status(&mut self) -> LedgerResult<Option<Transition<ShipmentStatus>>> {
        match self.status {
            s if s.is_terminal() => Ok(None),
            ShipmentStatus::Released => Err(LedgerError::InvalidOperation(format!(
                "shipment {} is already released",
                self.number
            ))),
            _ => {
                let target = self.allocation_target();
                Ok(self.transition_to(target))
            }
        }
    }

    fn allocation_target(&self) -> ShipmentStatus {
        if self.items.values().all(LineItem::is_allocated) {
            ShipmentStatus::InventoryAssigned
        } else {
            ShipmentStatus::AwaitingInventory
        }
    }

    /// INVENTORY_ASSIGNED → RELEASED
    pub fn release(&mut self, effective: ShipmentStatus) -> LedgerResult<Option<Transition<ShipmentStatus>>> {
        if self.status.is_terminal() {
            return Ok(None);
        }
        if effective != ShipmentStatus::InventoryAssigned {
            return Err(LedgerError::InvalidOperation(format!(
                "shipment {} cannot be released from {:?}",
                self.number, effective
            )));
        }
        Ok(self.transition_to(ShipmentStatus::Released))
    }

    /// RELEASED → SHIPPED
    pub fn complete(&mut self, effective: ShipmentStatus) -> LedgerResult<Option<Transition<ShipmentStatus>>> {
        if self.status.is_terminal() {
            return Ok(None);
        }
        if effective != ShipmentStatus::Released {
            return Err(LedgerError::InvalidOperation(format!(
                "shipment {} cannot ship from {:?}",
                self.number, effective
            )));
        }
        Ok(self.transition_to(ShipmentStatus::Shipped))
    }

    pub fn cancel(&mut self, effective: ShipmentStatus) -> LedgerResult<Option<Transition<ShipmentStatus>>> {
        if self.status.is_terminal() {
            return Ok(None);
        }
        if !self.is_cancellable(effective) {
            return Err(LedgerError::InvalidOperation(format!(
                "shipment {} cannot be cancelled",
                self.number
            )));
        }
        Ok(self.transition_to(ShipmentStatus::Cancelled))
    }

    /// Order-level cascade; bypasses the per-shipment rules
    pub(crate) fn force_status(&mut self, status: ShipmentStatus) -> Option<Transition<ShipmentStatus>> {
        self.transition_to(status)
    }

    fn transition_to(&mut self, target: ShipmentStatus) -> Option<Transition<ShipmentStatus>> {
        if self.status == target {
            return None;
        }
        let from = std::mem::replace(&mut self.status, target);
        Some(Transition { from, to: target })
    }

    /// Electronic shipments are never cancellable
    pub fn is_cancellable(&self, effective: ShipmentStatus) -> bool {
        self.kind != ShipmentKind::Electronic
            && !effective.is_terminal()
            && effective != ShipmentStatus::Released
    }

    pub fn is_refundable(&self, effective: ShipmentStatus) -> bool {
        effective == ShipmentStatus::Shipped
    }

    pub fn is_ready_for_funds_capture(&self, effective: ShipmentStatus) -> bool {
        effective == ShipmentStatus::Released
    }

    // ========== Recalculation ==========

    pub fn is_recalculation_enabled(&self) -> bool {
        self.recalculation_enabled && self.status != ShipmentStatus::Failed
    }

    pub(crate) fn set_recalculation_enabled(&mut self, enabled: bool) {
        self.recalculation_enabled = enabled;
    }

    /// Tax is frozen once the shipment is cancelled or shipped, and for
    /// physical/electronic shipments also once released
    pub fn tax_recalculation_required(&self, effective: ShipmentStatus) -> bool {
        match effective {
            ShipmentStatus::Cancelled | ShipmentStatus::Shipped => false,
            ShipmentStatus::Released => self.kind == ShipmentKind::Service,
            _ => true,
        }
    }

    /// `<shipmentNumber>.<uuid>`, created on first use
    pub fn tax_document_id(&mut self) -> &str {
        let number = &self.number;
        self.tax_document_id
            .get_or_insert_with(|| format!("{}.{}", number, uuid::Uuid::new_v4()))
    }

    pub fn reset_tax_document_id(&mut self) {
        self.tax_document_id = Some(format!("{}.{}", self.number, uuid::Uuid::new_v4()));
    }

    pub(crate) fn plan_recompute(&mut self, effective: ShipmentStatus) -> RecomputePlan {
        if !self.is_recalculation_enabled() {
            return RecomputePlan::Disabled;
        }
        let revision = self.revision;
        if self.tax_recalculation_required(effective) {
            RecomputePlan::Tax {
                request: self.tax_request(),
                revision,
            }
        } else {
            RecomputePlan::DeriveOnly { revision }
        }
    }

    pub(crate) fn tax_request(&mut self) -> TaxRequest {
        let document_id = self.tax_document_id().to_string();
        TaxRequest {
            document_id,
            kind: TaxDocumentKind::Shipment,
            currency: self.currency,
            lines: self
                .items
                .values()
                .map(|item| TaxLine {
                    line_id: item.id().to_string(),
                    sku_code: item.sku_code().to_string(),
                    quantity: item.quantity(),
                    amount: item.line_amount(),
                })
                .collect(),
            shipping_cost: (self.kind == ShipmentKind::Physical).then_some(self.shipping_cost),
            address: self.address.clone(),
        }
    }

    /// Commit a tax result; nothing is written unless the whole result is valid
    pub(crate) fn apply_tax(&mut self, request: &TaxRequest, result: &TaxResult) -> LedgerResult<()> {
        validate_result(request, result)?;
        for line in &request.lines {
            if !self.items.contains_key(&line.line_id) {
                return Err(LedgerError::InvalidTaxResult(format!(
                    "line {} left shipment {} during the tax call",
                    line.line_id, self.number
                )));
            }
        }

        for (line_id, tax) in &result.line_taxes {
            if let Some(item) = self.items.get_mut(line_id) {
                item.set_tax(*tax);
            }
        }
        self.item_tax = result.item_tax();
        self.shipping_tax = if self.kind == ShipmentKind::Physical {
            result.shipping_tax
        } else {
            Money::zero(self.currency)
        };
        self.inclusive_tax = result.inclusive;
        self.merge_tax_values(&result.categories);
        Ok(())
    }

    /// Reconcile by category name: update in place, add new, drop stale
    fn merge_tax_values(&mut self, categories: &[TaxCategoryAmount]) {
        for category in categories {
            match self.tax_values.get_mut(&category.name) {
                Some(existing) => {
                    existing.amount = category.amount;
                    existing.display_name.clone_from(&category.display_name);
                }
                None => {
                    self.tax_values
                        .insert(category.name.clone(), category.clone());
                }
            }
        }
        self.tax_values
            .retain(|name, _| categories.iter().any(|c| &c.name == name));
    }

    /// Refresh the subtotal from the lines and settle the dirty flags
    pub(crate) fn finish_recompute(&mut self) -> ShipmentTotals {
        self.item_subtotal = Money::sum(self.currency, self.items.values().map(LineItem::line_amount));
        for item in self.items.values_mut() {
            item.clear_amount_dirty();
        }
        self.amounts_dirty = false;
        self.totals()
    }

    /// Totals derived from the persistent amounts
    pub fn totals(&self) -> ShipmentTotals {
        let zero = Money::zero(self.currency);
        if self.kind == ShipmentKind::Service {
            return ShipmentTotals {
                subtotal_discount: self.subtotal_discount,
                ..ShipmentTotals::zero(self.currency)
            };
        }

        let subtotal = self.item_subtotal;
        let item_tax = self.item_tax;
        let (shipping_cost, shipping_tax) = match self.kind {
            ShipmentKind::Physical => (self.shipping_cost, self.shipping_tax),
            _ => (zero, zero),
        };
        let discount = self.subtotal_discount;

        let (subtotal_before_tax, before_tax_shipping_cost, total) = if self.inclusive_tax {
            (
                subtotal - item_tax,
                shipping_cost - shipping_tax,
                subtotal - discount + shipping_cost,
            )
        } else {
            (
                subtotal,
                shipping_cost,
                subtotal - discount + shipping_cost + item_tax + shipping_tax,
            )
        };

        ShipmentTotals {
            subtotal,
            subtotal_discount: discount,
            subtotal_before_tax,
            item_tax,
            shipping_cost,
            before_tax_shipping_cost,
            shipping_tax,
            total_tax: item_tax + shipping_tax,
            total,
            total_before_tax: subtotal_before_tax + before_tax_shipping_cost - discount,
        }
    }
}
