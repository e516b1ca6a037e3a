//! In-process ledger store
//!
//! Each client owns a book behind its own `tokio::sync::Mutex`, so postings
//! for one client are serialised while different clients never share a
//! lock. Used for tests and single-node development.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{LedgerStore, PostingDraft};
use crate::account::ClientCreditAccount;
use crate::accounting::{plan, OverdraftPolicy};
use crate::costs::FeatureCreditCost;
use crate::error::LedgerResult;
use crate::refund::net_charged;
use crate::transactions::{
    group_by_order, newest_first, CreditTransaction, NewCreditTransaction, OrderGroup, Page,
    PageRequest, TransactionFilter,
};

#[derive(Debug, Default)]
struct ClientBook {
    account: Option<ClientCreditAccount>,
    /// Append order
    transactions: Vec<CreditTransaction>,
}

impl ClientBook {
    fn append(&mut self, entry: NewCreditTransaction, now: OffsetDateTime) -> CreditTransaction {
        let tx = entry.into_transaction(Uuid::new_v4(), now);
        self.transactions.push(tx.clone());
        tx
    }
}

type CostKey = (String, String);

#[derive(Default)]
pub struct MemoryLedgerStore {
    books: RwLock<HashMap<String, Arc<Mutex<ClientBook>>>>,
    costs: RwLock<HashMap<CostKey, FeatureCreditCost>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn existing_book(&self, client_id: &str) -> Option<Arc<Mutex<ClientBook>>> {
        self.books.read().await.get(client_id).cloned()
    }

    async fn book(&self, client_id: &str) -> Arc<Mutex<ClientBook>> {
        if let Some(book) = self.existing_book(client_id).await {
            return book;
        }
        let mut books = self.books.write().await;
        Arc::clone(books.entry(client_id.to_string()).or_default())
    }

    /// Snapshot of a client's transactions in append order.
    async fn transactions(&self, client_id: &str) -> Vec<CreditTransaction> {
        match self.existing_book(client_id).await {
            Some(book) => book.lock().await.transactions.clone(),
            None => Vec::new(),
        }
    }
}

fn cost_key(client_id: &str, feature: &str) -> CostKey {
    (client_id.to_string(), feature.to_string())
}

impl LedgerStore for MemoryLedgerStore {
    async fn find_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
    ) -> LedgerResult<Option<FeatureCreditCost>> {
        Ok(self
            .costs
            .read()
            .await
            .get(&cost_key(client_id, feature))
            .cloned())
    }

    async fn upsert_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
        is_active: bool,
    ) -> LedgerResult<FeatureCreditCost> {
        let rule = FeatureCreditCost {
            client_id: client_id.to_string(),
            feature: feature.to_string(),
            cost,
            is_active,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.costs
            .write()
            .await
            .insert(cost_key(client_id, feature), rule.clone());
        Ok(rule)
    }

    async fn set_cost_rule_active(
        &self,
        client_id: &str,
        feature: &str,
        is_active: bool,
    ) -> LedgerResult<Option<FeatureCreditCost>> {
        let mut costs = self.costs.write().await;
        Ok(costs.get_mut(&cost_key(client_id, feature)).map(|rule| {
            rule.is_active = is_active;
            rule.updated_at = OffsetDateTime::now_utc();
            rule.clone()
        }))
    }

    async fn insert_cost_rule_if_absent(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
    ) -> LedgerResult<bool> {
        let mut costs = self.costs.write().await;
        let key = cost_key(client_id, feature);
        if costs.contains_key(&key) {
            return Ok(false);
        }
        costs.insert(
            key,
            FeatureCreditCost {
                client_id: client_id.to_string(),
                feature: feature.to_string(),
                cost,
                is_active: true,
                updated_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(true)
    }

    async fn list_cost_rules(&self, client_id: &str) -> LedgerResult<Vec<FeatureCreditCost>> {
        let mut rules: Vec<FeatureCreditCost> = self
            .costs
            .read()
            .await
            .values()
            .filter(|rule| rule.client_id == client_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.feature.cmp(&b.feature));
        Ok(rules)
    }

    async fn find_account(&self, client_id: &str) -> LedgerResult<Option<ClientCreditAccount>> {
        match self.existing_book(client_id).await {
            Some(book) => Ok(book.lock().await.account.clone()),
            None => Ok(None),
        }
    }

    async fn ensure_account(&self, client_id: &str) -> LedgerResult<ClientCreditAccount> {
        let book = self.book(client_id).await;
        let mut book = book.lock().await;
        let account = book
            .account
            .get_or_insert_with(|| ClientCreditAccount::empty(client_id, OffsetDateTime::now_utc()));
        Ok(account.clone())
    }

    async fn post(
        &self,
        client_id: &str,
        draft: PostingDraft,
        policy: OverdraftPolicy,
    ) -> LedgerResult<(ClientCreditAccount, CreditTransaction)> {
        let book = self.book(client_id).await;
        let mut book = book.lock().await;

        let before = book
            .account
            .as_ref()
            .map(ClientCreditAccount::totals)
            .unwrap_or_default();
        let refundable = draft
            .op
            .refund_order_id()
            .map(|order_id| net_charged(&book.transactions, order_id));

        let posting = plan(&before, &draft.op, refundable, policy)?;

        let now = OffsetDateTime::now_utc();
        let account = ClientCreditAccount::with_totals(client_id, posting.after, now);
        let entry = draft.into_entry(client_id, &posting);

        book.account = Some(account.clone());
        let tx = book.append(entry, now);

        Ok((account, tx))
    }

    async fn list_transactions(
        &self,
        client_id: &str,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<CreditTransaction>> {
        let matching: Vec<CreditTransaction> = self
            .transactions(client_id)
            .await
            .into_iter()
            .filter(|tx| filter.matches(tx))
            .collect();
        Ok(page.slice(newest_first(matching)))
    }

    async fn list_order_groups(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> LedgerResult<Page<OrderGroup>> {
        let all = newest_first(self.transactions(client_id).await);
        Ok(page.slice(group_by_order(all)))
    }

    async fn latest_transaction(&self, client_id: &str) -> LedgerResult<Option<CreditTransaction>> {
        Ok(newest_first(self.transactions(client_id).await)
            .into_iter()
            .next())
    }
}
