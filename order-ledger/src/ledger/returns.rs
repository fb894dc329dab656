//! Return / exchange calculator
//!
//! A return covers a subset of one shipment's lines. Item tax is the
//! quantity-weighted share of each original line's tax; shipping tax and the
//! per-category breakdown come from the tax service. Once a return is
//! COMPLETED or CANCELLED every status operation on it is a no-op.

use super::error::{LedgerError, LedgerResult};
use super::money::{prorate, round_half_up, sum_rounded};
use super::Transition;
use serde::{Deserialize, Serialize};
use shared::money::{Currency, Money};
use shared::order::{
    ReturnKind, ReturnStatus, TaxCategoryAmount, TaxDocumentKind, TaxLine, TaxRequest, TaxResult,
};

/// Caller input for one returned line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLineInput {
    pub line_item_id: String,
    pub quantity: u32,
}

/// Caller input for a new return
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnDraft {
    pub rma_code: String,
    #[serde(default)]
    pub kind: ReturnKind,
    /// Goods have to come back before the return can complete
    pub physical_return: bool,
    pub lines: Vec<ReturnLineInput>,
    #[serde(default)]
    pub shipping_cost: Option<Money>,
    #[serde(default)]
    pub shipment_discount: Option<Money>,
    #[serde(default)]
    pub less_restock_amount: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub line_item_id: String,
    pub sku_code: String,
    pub quantity: u32,
    pub received_quantity: u32,
    pub original_quantity: u32,
    /// Unit price less the per-unit discount of the original line
    pub unit_price: Money,
    pub original_tax: Money,
    /// Prorated tax at full precision
    pub tax: Money,
}

impl ReturnLine {
    pub fn amount(&self) -> Money {
        self.unit_price * rust_decimal::Decimal::from(self.quantity)
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity >= self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnTotals {
    pub subtotal: Money,
    pub tax_total: Money,
    pub shipping_cost: Money,
    pub shipping_tax: Money,
    pub shipment_discount: Money,
    pub less_restock_amount: Money,
    pub before_tax_return_total: Money,
    pub return_total: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    rma_code: String,
    kind: ReturnKind,
    status: ReturnStatus,
    shipment_number: String,
    physical_return: bool,
    currency: Currency,
    /// Read from the shipment when the return is created
    inclusive_tax: bool,
    lines: Vec<ReturnLine>,
    shipping_cost: Money,
    shipping_tax: Money,
    shipment_discount: Money,
    less_restock_amount: Money,
    #[serde(default)]
    tax_values: Vec<TaxCategoryAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exchange_order_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exchange_order_total: Option<Money>,
    totals: ReturnTotals,
}

impl ReturnRequest {
    pub(crate) fn new(
        draft: &ReturnDraft,
        shipment_number: impl Into<String>,
        currency: Currency,
        inclusive_tax: bool,
        lines: Vec<ReturnLine>,
    ) -> Self {
        let zero = Money::zero(currency);
        let status = if draft.physical_return {
            ReturnStatus::AwaitingStockReturn
        } else {
            ReturnStatus::Completed
        };
        let mut request = Self {
            rma_code: draft.rma_code.clone(),
            kind: draft.kind,
            status,
            shipment_number: shipment_number.into(),
            physical_return: draft.physical_return,
            currency,
            inclusive_tax,
            lines,
            shipping_cost: draft.shipping_cost.unwrap_or(zero),
            shipping_tax: zero,
            shipment_discount: draft.shipment_discount.unwrap_or(zero),
            less_restock_amount: draft.less_restock_amount.unwrap_or(zero),
            tax_values: Vec::new(),
            exchange_order_number: None,
            exchange_order_total: None,
            totals: ReturnTotals {
                subtotal: zero,
                tax_total: zero,
                shipping_cost: zero,
                shipping_tax: zero,
                shipment_discount: zero,
                less_restock_amount: zero,
                before_tax_return_total: zero,
                return_total: zero,
            },
        };
        request.normalize();
        request.calculate();
        request
    }

    pub fn rma_code(&self) -> &str {
        &self.rma_code
    }

    pub fn kind(&self) -> ReturnKind {
        self.kind
    }

    pub fn status(&self) -> ReturnStatus {
        self.status
    }

    pub fn shipment_number(&self) -> &str {
        &self.shipment_number
    }

    pub fn is_physical_return(&self) -> bool {
        self.physical_return
    }

    pub fn lines(&self) -> &[ReturnLine] {
        &self.lines
    }

    pub fn totals(&self) -> ReturnTotals {
        self.totals
    }

    pub fn tax_values(&self) -> &[TaxCategoryAmount] {
        &self.tax_values
    }

    pub fn exchange_order_number(&self) -> Option<&str> {
        self.exchange_order_number.as_deref()
    }

    pub fn is_in_terminal_state(&self) -> bool {
        self.status.is_terminal()
    }

    /// Quantity this return holds against an original line (cancelled returns hold none)
    pub fn claimed_quantity(&self, line_item_id: &str) -> u32 {
        if self.status == ReturnStatus::Cancelled {
            return 0;
        }
        self.lines
            .iter()
            .filter(|l| l.line_item_id == line_item_id)
            .map(|l| l.quantity)
            .sum()
    }

    /// Drop lines with nothing to return
    pub fn normalize(&mut self) {
        self.lines.retain(|l| l.quantity > 0);
    }

    pub(crate) fn replace_lines(&mut self, lines: Vec<ReturnLine>) -> LedgerResult<()> {
        self.ensure_open()?;
        self.lines = lines;
        self.normalize();
        self.calculate();
        Ok(())
    }

    fn ensure_open(&self) -> LedgerResult<()> {
        if self.is_in_terminal_state() {
            return Err(LedgerError::ReturnClosed(self.rma_code.clone()));
        }
        Ok(())
    }

    // ========== Calculation ==========

    /// Recompute prorated taxes and totals from the lines
    pub fn calculate(&mut self) -> ReturnTotals {
        for line in &mut self.lines {
            line.tax = prorate(line.original_tax, line.quantity, line.original_quantity);
        }
        let currency = self.currency;
        let subtotal = sum_rounded(currency, self.lines.iter().map(ReturnLine::amount));
        let tax_total = sum_rounded(currency, self.lines.iter().map(|l| l.tax));

        let mut total = subtotal + self.shipping_cost;
        if !self.inclusive_tax {
            total += tax_total + self.shipping_tax;
        }
        if self.shipment_discount <= total {
            total -= self.shipment_discount;
        }
        if self.less_restock_amount <= total {
            total -= self.less_restock_amount;
        } else {
            self.less_restock_amount = Money::zero(currency);
        }

        self.totals = ReturnTotals {
            subtotal,
            tax_total,
            shipping_cost: self.shipping_cost,
            shipping_tax: self.shipping_tax,
            shipment_discount: self.shipment_discount,
            less_restock_amount: self.less_restock_amount,
            before_tax_return_total: subtotal + self.shipping_cost,
            return_total: Money::new(round_half_up(total.amount()), currency),
        };
        self.totals
    }

    pub(crate) fn tax_request(&self) -> TaxRequest {
        TaxRequest {
            document_id: self.rma_code.clone(),
            kind: TaxDocumentKind::Return,
            currency: self.currency,
            lines: self
                .lines
                .iter()
                .map(|l| TaxLine {
                    line_id: l.line_item_id.clone(),
                    sku_code: l.sku_code.clone(),
                    quantity: l.quantity,
                    amount: l.amount().rounded(),
                })
                .collect(),
            shipping_cost: (!self.shipping_cost.is_zero()).then_some(self.shipping_cost),
            address: None,
        }
    }

    /// Take shipping tax and the category breakdown from the service
    pub(crate) fn apply_tax(&mut self, result: &TaxResult) -> ReturnTotals {
        self.shipping_tax = if self.shipping_cost.is_zero() {
            Money::zero(self.currency)
        } else {
            result.shipping_tax
        };
        self.tax_values = result.categories.clone();
        self.calculate()
    }

    // ========== Status ==========

    pub fn is_fully_received(&self) -> bool {
        self.lines.iter().all(ReturnLine::is_fully_received)
    }

    pub fn is_partially_received(&self) -> bool {
        self.lines.iter().any(|l| l.received_quantity > 0) && !self.is_fully_received()
    }

    /// Toggle between the two waiting states; no-op once terminal
    pub fn update_status(&mut self) -> Option<Transition<ReturnStatus>> {
        if self.is_in_terminal_state() {
            return None;
        }
        let target = if self.is_fully_received() {
            ReturnStatus::AwaitingCompletion
        } else {
            ReturnStatus::AwaitingStockReturn
        };
        self.transition_to(target)
    }

    /// Record goods arriving back in the warehouse
    pub fn receive(&mut self, line_item_id: &str, quantity: u32) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        self.ensure_open()?;
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.line_item_id == line_item_id)
            .ok_or_else(|| LedgerError::LineItemNotFound(line_item_id.to_string()))?;
        let remaining = line.quantity - line.received_quantity.min(line.quantity);
        if quantity > remaining {
            return Err(LedgerError::ReturnQuantityExceeded {
                line_item_id: line_item_id.to_string(),
                requested: quantity,
                remaining,
            });
        }
        line.received_quantity += quantity;
        Ok(self.update_status())
    }

    pub fn complete(&mut self) -> Option<Transition<ReturnStatus>> {
        if self.is_in_terminal_state() {
            return None;
        }
        self.transition_to(ReturnStatus::Completed)
    }

    /// Only a return still waiting for stock can be cancelled
    pub fn cancel(&mut self) -> LedgerResult<Option<Transition<ReturnStatus>>> {
        match self.status {
            s if s.is_terminal() => Ok(None),
            ReturnStatus::AwaitingStockReturn => Ok(self.transition_to(ReturnStatus::Cancelled)),
            other => Err(LedgerError::InvalidOperation(format!(
                "return {} cannot be cancelled from {:?}",
                self.rma_code, other
            ))),
        }
    }

    fn transition_to(&mut self, target: ReturnStatus) -> Option<Transition<ReturnStatus>> {
        if self.status == target {
            return None;
        }
        let from = std::mem::replace(&mut self.status, target);
        Some(Transition { from, to: target })
    }

    // ========== Exchange and refunds ==========

    pub(crate) fn link_exchange_order(&mut self, order_number: impl Into<String>, order_total: Money) {
        self.exchange_order_number = Some(order_number.into());
        self.exchange_order_total = Some(order_total);
    }

    pub(crate) fn set_exchange_order_total(&mut self, order_total: Money) {
        if self.exchange_order_number.is_some() {
            self.exchange_order_total = Some(order_total);
        }
    }

    /// `returnTotal − refundedTotal`
    pub fn owed_to_customer(&self, refunded_total: Money) -> Money {
        self.totals.return_total - refunded_total
    }

    /// For an exchange only the difference to the replacement order is refunded
    pub fn refund_total(&self) -> Money {
        match (self.kind, self.exchange_order_total) {
            (ReturnKind::Exchange, Some(exchange_total)) => self.totals.return_total - exchange_total,
            _ => self.totals.return_total,
        }
    }
}
