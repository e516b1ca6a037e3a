//! Ledger error types

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors returned by the credit ledger.
///
/// Business-rule failures (`InvalidAmount`, `InvalidCost`, `UnknownFeature`,
/// `InsufficientCredit`, `NothingToRefund`) are expected outcomes the caller
/// branches on. Everything else is infrastructure.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid cost: {0}")]
    InvalidCost(String),

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Insufficient credits: balance {balance}, required {required}")]
    InsufficientCredit { balance: Decimal, required: Decimal },

    #[error("Nothing to refund for order {0}")]
    NothingToRefund(String),

    #[error("Credit account not found for client {0}")]
    AccountNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// True for expected business outcomes, false for infrastructure faults.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount(_)
                | LedgerError::InvalidCost(_)
                | LedgerError::UnknownFeature(_)
                | LedgerError::InsufficientCredit { .. }
                | LedgerError::NothingToRefund(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        LedgerError::Database(format!("migration failed: {}", err))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
