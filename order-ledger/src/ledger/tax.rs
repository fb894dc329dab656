//! External tax service seam
//!
//! The engine never computes jurisdiction rates itself. It hands a
//! [`TaxRequest`] to an injected [`TaxService`] and checks the answer with
//! [`validate_result`] before touching any ledger state.

use super::error::{LedgerError, LedgerResult};
use async_trait::async_trait;
use shared::order::{TaxRequest, TaxResult};
use std::collections::HashSet;
use thiserror::Error;

/// Errors reported by a tax service implementation
#[derive(Debug, Clone, Error)]
pub enum TaxError {
    /// Transient failure (network, overload); safe to retry
    #[error("tax service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request; retrying will not help
    #[error("tax request rejected: {0}")]
    Rejected(String),
}

impl TaxError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaxError::Unavailable(_))
    }
}

/// Tax calculation capability
///
/// Implementations must be idempotent: the same request yields the same result.
#[async_trait]
pub trait TaxService: Send + Sync {
    async fn calculate_taxes(&self, request: &TaxRequest) -> Result<TaxResult, TaxError>;
}

/// Check that a result answers exactly the given request
pub fn validate_result(request: &TaxRequest, result: &TaxResult) -> LedgerResult<()> {
    let requested: HashSet<&str> = request.lines.iter().map(|l| l.line_id.as_str()).collect();

    for line_id in &requested {
        if !result.line_taxes.contains_key(*line_id) {
            return Err(LedgerError::InvalidTaxResult(format!(
                "missing tax for line {}",
                line_id
            )));
        }
    }
    if let Some(extra) = result
        .line_taxes
        .keys()
        .find(|id| !requested.contains(id.as_str()))
    {
        return Err(LedgerError::InvalidTaxResult(format!(
            "unexpected tax for line {}",
            extra
        )));
    }

    let currency = request.currency;
    let amounts = result
        .line_taxes
        .values()
        .chain(std::iter::once(&result.shipping_tax))
        .chain(result.categories.iter().map(|c| &c.amount));
    for amount in amounts {
        if amount.currency() != currency {
            return Err(LedgerError::InvalidTaxResult(format!(
                "amount in {} for a {} document",
                amount.currency(),
                currency
            )));
        }
    }

    let mut seen = HashSet::new();
    for category in &result.categories {
        if !seen.insert(category.name.as_str()) {
            return Err(LedgerError::InvalidTaxResult(format!(
                "duplicate tax category {}",
                category.name
            )));
        }
    }
    Ok(())
}
