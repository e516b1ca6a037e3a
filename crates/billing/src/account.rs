//! Client credit accounts
//!
//! One row per tenant holding the current balance and running totals.
//! Nothing in this module changes a balance; see [`crate::ledger`].

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::accounting::AccountTotals;
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

/// Current credit state of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCreditAccount {
    pub client_id: String,
    /// Always `total_added - total_used`
    pub balance: Decimal,
    pub total_added: Decimal,
    pub total_used: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ClientCreditAccount {
    pub fn empty(client_id: &str, now: OffsetDateTime) -> Self {
        Self {
            client_id: client_id.to_string(),
            balance: Decimal::ZERO,
            total_added: Decimal::ZERO,
            total_used: Decimal::ZERO,
            updated_at: now,
        }
    }

    pub fn totals(&self) -> AccountTotals {
        AccountTotals {
            balance: self.balance,
            total_added: self.total_added,
            total_used: self.total_used,
        }
    }

    pub(crate) fn with_totals(
        client_id: &str,
        totals: AccountTotals,
        updated_at: OffsetDateTime,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            balance: totals.balance,
            total_added: totals.total_added,
            total_used: totals.total_used,
            updated_at,
        }
    }
}

/// Read/provision access to accounts
pub struct CreditAccounts<S> {
    store: Arc<S>,
}

impl<S> Clone for CreditAccounts<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> CreditAccounts<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get(&self, client_id: &str) -> LedgerResult<ClientCreditAccount> {
        self.store
            .find_account(client_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(client_id.to_string()))
    }

    /// Create a zero-balance account if none exists. Idempotent.
    pub async fn ensure_exists(&self, client_id: &str) -> LedgerResult<ClientCreditAccount> {
        self.store.ensure_account(client_id).await
    }
}
