//! Line item (per-SKU) ledger
//!
//! A line item owns its quantity, prices, discount, tax and allocation
//! counts. Mutators only mark the item dirty; the coordinator decides which
//! shipment work follows from the kind of change.

use super::money::per_unit;
use serde::{Deserialize, Serialize};
use shared::money::{Currency, Money};

/// What a mutation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChange {
    /// Quantity, price or discount changed: tax and totals must be recomputed
    Amount,
    /// Only allocation changed: shipment status must be re-evaluated
    Allocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    id: String,
    sku_code: String,
    quantity: u32,
    unit_price: Money,
    /// Catalog price before any sale pricing, used for savings display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_unit_price: Option<Money>,
    discount: Money,
    tax: Money,
    allocated_quantity: u32,
    /// Allocation granted while the line quantity is being edited
    #[serde(default)]
    changed_quantity_allocated: u32,
    /// Remaining quantity that returns may still claim
    returnable_quantity: u32,
    /// Bundle parent; always present in the same shipment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(skip)]
    amount_dirty: bool,
    #[serde(skip)]
    allocation_dirty: bool,
}

impl LineItem {
    pub fn new(
        id: impl Into<String>,
        sku_code: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        let currency = unit_price.currency();
        Self {
            id: id.into(),
            sku_code: sku_code.into(),
            quantity,
            unit_price,
            list_unit_price: None,
            discount: Money::zero(currency),
            tax: Money::zero(currency),
            allocated_quantity: 0,
            changed_quantity_allocated: 0,
            returnable_quantity: quantity,
            parent: None,
            amount_dirty: true,
            allocation_dirty: true,
        }
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_allocated(mut self, allocated_quantity: u32) -> Self {
        self.allocated_quantity = allocated_quantity;
        self
    }

    pub fn with_list_price(mut self, list_unit_price: Money) -> Self {
        self.list_unit_price = Some(list_unit_price);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sku_code(&self) -> &str {
        &self.sku_code
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn list_unit_price(&self) -> Option<Money> {
        self.list_unit_price
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn tax(&self) -> Money {
        self.tax
    }

    pub fn allocated_quantity(&self) -> u32 {
        self.allocated_quantity
    }

    pub fn changed_quantity_allocated(&self) -> u32 {
        self.changed_quantity_allocated
    }

    pub fn returnable_quantity(&self) -> u32 {
        self.returnable_quantity
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Every money field of the line, for currency checks at the boundary
    pub fn currencies(&self) -> impl Iterator<Item = Currency> + '_ {
        [Some(self.unit_price), Some(self.discount), Some(self.tax), self.list_unit_price]
            .into_iter()
            .flatten()
            .map(|m| m.currency())
    }

    // ========== Mutators ==========

    pub fn set_quantity(&mut self, quantity: u32) -> Option<LineChange> {
        if self.quantity == quantity {
            return None;
        }
        self.quantity = quantity;
        self.amount_dirty = true;
        // Allocation status depends on quantity too
        self.allocation_dirty = true;
        Some(LineChange::Amount)
    }

    pub fn set_unit_price(&mut self, unit_price: Money) -> Option<LineChange> {
        if self.unit_price == unit_price {
            return None;
        }
        self.unit_price = unit_price;
        self.amount_dirty = true;
        Some(LineChange::Amount)
    }

    pub fn set_discount(&mut self, discount: Money) -> Option<LineChange> {
        if self.discount == discount {
            return None;
        }
        self.discount = discount;
        self.amount_dirty = true;
        Some(LineChange::Amount)
    }

    pub fn set_allocated_quantity(&mut self, allocated_quantity: u32) -> Option<LineChange> {
        if self.allocated_quantity == allocated_quantity {
            return None;
        }
        self.allocated_quantity = allocated_quantity;
        self.allocation_dirty = true;
        Some(LineChange::Allocation)
    }

    pub fn set_changed_quantity_allocated(&mut self, quantity: u32) -> Option<LineChange> {
        if self.changed_quantity_allocated == quantity {
            return None;
        }
        self.changed_quantity_allocated = quantity;
        self.allocation_dirty = true;
        Some(LineChange::Allocation)
    }

    /// Tax is only written by a shipment applying a tax result
    pub(crate) fn set_tax(&mut self, tax: Money) {
        self.tax = tax;
    }

    pub(crate) fn set_returnable_quantity(&mut self, quantity: u32) {
        self.returnable_quantity = quantity;
    }

    pub fn is_amount_dirty(&self) -> bool {
        self.amount_dirty
    }

    pub fn is_allocation_dirty(&self) -> bool {
        self.allocation_dirty
    }

    pub(crate) fn clear_amount_dirty(&mut self) {
        self.amount_dirty = false;
    }

    pub(crate) fn clear_allocation_dirty(&mut self) {
        self.allocation_dirty = false;
    }

    // ========== Derived ==========

    /// `max(0, unitPrice × quantity − discount)`
    pub fn line_amount(&self) -> Money {
        (self.unit_price * rust_decimal::Decimal::from(self.quantity) - self.discount)
            .max_zero()
            .rounded()
    }

    pub fn is_allocated(&self) -> bool {
        self.quantity <= self.allocated_quantity + self.changed_quantity_allocated
    }

    /// Unit price net of this line's per-unit share of the discount
    pub fn unit_price_less_discount(&self) -> Money {
        self.unit_price - per_unit(self.discount, self.quantity)
    }

    /// What the customer saves against the list price, never negative
    pub fn savings(&self) -> Money {
        match self.list_unit_price {
            Some(list) => {
                (list * rust_decimal::Decimal::from(self.quantity) - self.line_amount()).max_zero()
            }
            None => Money::zero(self.unit_price.currency()),
        }
    }
}
