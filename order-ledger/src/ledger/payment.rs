//! Read-only view over the payments recorded against an order

use super::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use shared::money::{Currency, Money, MoneyError};
use shared::order::{PaymentRecord, TransactionType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentLedger {
    records: Vec<PaymentRecord>,
}

impl PaymentLedger {
    /// Record a payment reported by the gateway
    ///
    /// A record with an id already present replaces the earlier one (status updates).
    pub fn record(&mut self, currency: Currency, payment: PaymentRecord) -> LedgerResult<()> {
        if payment.amount.currency() != currency {
            return Err(MoneyError::CurrencyMismatch {
                left: currency,
                right: payment.amount.currency(),
            }
            .into());
        }
        if payment.amount.is_negative() {
            return Err(LedgerError::InvalidPayment(format!(
                "payment {} has a negative amount",
                payment.payment_id
            )));
        }
        match self
            .records
            .iter_mut()
            .find(|r| r.payment_id == payment.payment_id)
        {
            Some(existing) => *existing = payment,
            None => self.records.push(payment),
        }
        Ok(())
    }

    pub fn records(&self) -> &[PaymentRecord] {
        &self.records
    }

    fn approved_total(&self, currency: Currency, kind: TransactionType) -> Money {
        Money::sum(
            currency,
            self.records
                .iter()
                .filter(|r| r.is_approved() && r.transaction_type == kind)
                .map(|r| r.amount),
        )
    }

    pub fn captured(&self, currency: Currency) -> Money {
        self.approved_total(currency, TransactionType::Capture)
    }

    pub fn credited(&self, currency: Currency) -> Money {
        self.approved_total(currency, TransactionType::Credit)
    }

    /// Approved credits issued against one return
    pub fn credited_for_return(&self, currency: Currency, rma_code: &str) -> Money {
        Money::sum(
            currency,
            self.records
                .iter()
                .filter(|r| {
                    r.is_approved()
                        && r.transaction_type == TransactionType::Credit
                        && r.rma_code.as_deref() == Some(rma_code)
                })
                .map(|r| r.amount),
        )
    }
}

/// Balance figures computed on demand
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaymentSummary {
    pub captured: Money,
    pub credited: Money,
    /// captured − credited
    pub paid: Money,
    /// Order total less cancelled shipments
    pub adjusted_total: Money,
    /// Return total still owed by a pending exchange
    pub due_to_rma: Money,
    /// What the customer still owes; negative when overpaid
    pub balance: Money,
}
