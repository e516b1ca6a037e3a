//! Ledger storage
//!
//! [`LedgerStore`] is the persistence seam. [`LedgerStore::post`] is the
//! only way a balance changes: it serialises work per client, plans the
//! change with [`crate::accounting::plan`], then updates the account and
//! appends the transaction as one atomic unit.

mod memory;
mod postgres;

use std::future::Future;

use rust_decimal::Decimal;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use crate::account::ClientCreditAccount;
use crate::accounting::{LedgerOp, OverdraftPolicy, Posting};
use crate::costs::FeatureCreditCost;
use crate::error::LedgerResult;
use crate::transactions::{
    CreditTransaction, NewCreditTransaction, OrderGroup, Page, PageRequest, TransactionFilter,
};

/// Everything needed to post one ledger entry apart from the amounts, which
/// are planned inside the critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingDraft {
    pub op: LedgerOp,
    pub client_name: String,
    pub description: String,
    pub feature: Option<String>,
    pub order_id: Option<String>,
    pub user_id: Option<String>,
}

impl PostingDraft {
    pub(crate) fn into_entry(self, client_id: &str, posting: &Posting) -> NewCreditTransaction {
        NewCreditTransaction {
            client_id: client_id.to_string(),
            client_name: self.client_name,
            kind: posting.kind,
            amount: posting.amount,
            balance: posting.after.balance,
            description: self.description,
            feature: self.feature,
            order_id: self.order_id,
            user_id: self.user_id,
        }
    }
}

pub trait LedgerStore: Send + Sync + 'static {
    // Feature cost rules

    fn find_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
    ) -> impl Future<Output = LedgerResult<Option<FeatureCreditCost>>> + Send;

    fn upsert_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
        is_active: bool,
    ) -> impl Future<Output = LedgerResult<FeatureCreditCost>> + Send;

    fn set_cost_rule_active(
        &self,
        client_id: &str,
        feature: &str,
        is_active: bool,
    ) -> impl Future<Output = LedgerResult<Option<FeatureCreditCost>>> + Send;

    /// Returns `true` when a rule was created.
    fn insert_cost_rule_if_absent(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
    ) -> impl Future<Output = LedgerResult<bool>> + Send;

    fn list_cost_rules(
        &self,
        client_id: &str,
    ) -> impl Future<Output = LedgerResult<Vec<FeatureCreditCost>>> + Send;

    // Accounts

    fn find_account(
        &self,
        client_id: &str,
    ) -> impl Future<Output = LedgerResult<Option<ClientCreditAccount>>> + Send;

    fn ensure_account(
        &self,
        client_id: &str,
    ) -> impl Future<Output = LedgerResult<ClientCreditAccount>> + Send;

    /// Atomically apply `draft` to the client's account.
    ///
    /// On any error nothing is written: no account row is created, no
    /// balance changes and no transaction is appended.
    fn post(
        &self,
        client_id: &str,
        draft: PostingDraft,
        policy: OverdraftPolicy,
    ) -> impl Future<Output = LedgerResult<(ClientCreditAccount, CreditTransaction)>> + Send;

    // Transaction log

    fn list_transactions(
        &self,
        client_id: &str,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> impl Future<Output = LedgerResult<Page<CreditTransaction>>> + Send;

    fn list_order_groups(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> impl Future<Output = LedgerResult<Page<OrderGroup>>> + Send;

    fn latest_transaction(
        &self,
        client_id: &str,
    ) -> impl Future<Output = LedgerResult<Option<CreditTransaction>>> + Send;
}

/// Store selected at startup
pub enum LedgerBackend {
    Postgres(PgLedgerStore),
    Memory(MemoryLedgerStore),
}

impl LedgerBackend {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerBackend::Postgres(_) => "postgres",
            LedgerBackend::Memory(_) => "memory",
        }
    }

    /// The Postgres pool, when running against Postgres.
    pub fn pg_pool(&self) -> Option<&sqlx::PgPool> {
        match self {
            LedgerBackend::Postgres(store) => Some(store.pool()),
            LedgerBackend::Memory(_) => None,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            LedgerBackend::Postgres($store) => $call.await,
            LedgerBackend::Memory($store) => $call.await,
        }
    };
}

impl LedgerStore for LedgerBackend {
    async fn find_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
    ) -> LedgerResult<Option<FeatureCreditCost>> {
        dispatch!(self, s => s.find_cost_rule(client_id, feature))
    }

    async fn upsert_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
        is_active: bool,
    ) -> LedgerResult<FeatureCreditCost> {
        dispatch!(self, s => s.upsert_cost_rule(client_id, feature, cost, is_active))
    }

    async fn set_cost_rule_active(
        &self,
        client_id: &str,
        feature: &str,
        is_active: bool,
    ) -> LedgerResult<Option<FeatureCreditCost>> {
        dispatch!(self, s => s.set_cost_rule_active(client_id, feature, is_active))
    }

    async fn insert_cost_rule_if_absent(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
    ) -> LedgerResult<bool> {
        dispatch!(self, s => s.insert_cost_rule_if_absent(client_id, feature, cost))
    }

    async fn list_cost_rules(&self, client_id: &str) -> LedgerResult<Vec<FeatureCreditCost>> {
        dispatch!(self, s => s.list_cost_rules(client_id))
    }

    async fn find_account(&self, client_id: &str) -> LedgerResult<Option<ClientCreditAccount>> {
        dispatch!(self, s => s.find_account(client_id))
    }

    async fn ensure_account(&self, client_id: &str) -> LedgerResult<ClientCreditAccount> {
        dispatch!(self, s => s.ensure_account(client_id))
    }

    async fn post(
        &self,
        client_id: &str,
        draft: PostingDraft,
        policy: OverdraftPolicy,
    ) -> LedgerResult<(ClientCreditAccount, CreditTransaction)> {
        dispatch!(self, s => s.post(client_id, draft, policy))
    }

    async fn list_transactions(
        &self,
        client_id: &str,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<CreditTransaction>> {
        dispatch!(self, s => s.list_transactions(client_id, filter, page))
    }

    async fn list_order_groups(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> LedgerResult<Page<OrderGroup>> {
        dispatch!(self, s => s.list_order_groups(client_id, page))
    }

    async fn latest_transaction(&self, client_id: &str) -> LedgerResult<Option<CreditTransaction>> {
        dispatch!(self, s => s.latest_transaction(client_id))
    }
}
