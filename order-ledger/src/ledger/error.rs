use super::tax::TaxError;
use shared::error::{AppError, ErrorCode};
use shared::money::MoneyError;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Shipment not found: {0}")]
    ShipmentNotFound(String),

    #[error("Line item not found: {0}")]
    LineItemNotFound(String),

    #[error("Return not found: {0}")]
    ReturnNotFound(String),

    #[error("Order {0} must be persisted before shipments can be added")]
    OrderNotPersisted(String),

    #[error("Order already exists: {0}")]
    OrderAlreadyExists(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Return {rma_code} spans shipments {expected} and {found}")]
    ReturnSpansShipments {
        rma_code: String,
        expected: String,
        found: String,
    },

    #[error("Return quantity {requested} for line {line_item_id} exceeds remaining {remaining}")]
    ReturnQuantityExceeded {
        line_item_id: String,
        requested: u32,
        remaining: u32,
    },

    #[error("Return {0} is closed")]
    ReturnClosed(String),

    #[error("Order {0} is not linked to an exchange")]
    ExchangeNotLinked(String),

    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    #[error("Tax service error: {0}")]
    TaxService(#[from] TaxError),

    #[error("Tax service timed out after {0} ms")]
    TaxTimeout(u64),

    #[error("Invalid tax result: {0}")]
    InvalidTaxResult(String),

    #[error("Shipment {0} kept changing during recompute")]
    StaleRecompute(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by callers to decide whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPrecondition,
    NotFound,
    ExternalDependency,
    Conflict,
    Internal,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::OrderNotFound(_)
            | LedgerError::ShipmentNotFound(_)
            | LedgerError::LineItemNotFound(_)
            | LedgerError::ReturnNotFound(_) => ErrorKind::NotFound,
            LedgerError::TaxService(_)
            | LedgerError::TaxTimeout(_)
            | LedgerError::InvalidTaxResult(_) => ErrorKind::ExternalDependency,
            LedgerError::StaleRecompute(_) => ErrorKind::Conflict,
            LedgerError::Internal(_) => ErrorKind::Internal,
            _ => ErrorKind::InvalidPrecondition,
        }
    }

    /// Tax failures and recompute conflicts leave prior totals intact and may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ExternalDependency | ErrorKind::Conflict
        )
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        let code = match &err {
            LedgerError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            LedgerError::ShipmentNotFound(_) => ErrorCode::ShipmentNotFound,
            LedgerError::LineItemNotFound(_) => ErrorCode::LineItemNotFound,
            LedgerError::ReturnNotFound(_) => ErrorCode::ReturnNotFound,
            LedgerError::OrderNotPersisted(_) => ErrorCode::OrderNotPersisted,
            LedgerError::OrderAlreadyExists(_) => ErrorCode::InvalidRequest,
            LedgerError::InvalidOperation(_) => ErrorCode::InvalidOrderState,
            LedgerError::Money(MoneyError::CurrencyMismatch { .. }) => ErrorCode::CurrencyMismatch,
            LedgerError::Money(MoneyError::InvalidCurrency(_)) => ErrorCode::ValidationFailed,
            LedgerError::InvalidBundle(_) => ErrorCode::InvalidBundle,
            LedgerError::ReturnSpansShipments { .. } => ErrorCode::ReturnSpansShipments,
            LedgerError::ReturnQuantityExceeded { .. } => ErrorCode::ReturnQuantityExceeded,
            LedgerError::ReturnClosed(_) => ErrorCode::ReturnClosed,
            LedgerError::ExchangeNotLinked(_) => ErrorCode::ExchangeNotLinked,
            LedgerError::InvalidPayment(_) => ErrorCode::PaymentInvalid,
            LedgerError::TaxService(e) => {
                tracing::error!(error = %e, "Tax service failure surfaced to caller");
                ErrorCode::TaxServiceFailed
            }
            LedgerError::TaxTimeout(ms) => {
                tracing::error!(timeout_ms = ms, "Tax service timeout surfaced to caller");
                ErrorCode::TaxServiceTimeout
            }
            LedgerError::InvalidTaxResult(_) => ErrorCode::TaxResultInvalid,
            LedgerError::StaleRecompute(_) => ErrorCode::RecomputeConflict,
            LedgerError::Internal(_) => ErrorCode::InternalError,
        };
        AppError::with_message(code, message)
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
