//! Credit transaction log
//!
//! Append-only history of every balance change. Rows are written only as
//! part of a ledger posting (see [`crate::ledger::CreditLedger`]) and are
//! never updated or deleted afterwards.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Kind of balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Add,
    Deduct,
    Reset,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Add => "ADD",
            TransactionType::Deduct => "DEDUCT",
            TransactionType::Reset => "RESET",
            TransactionType::Refund => "REFUND",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADD" => Ok(TransactionType::Add),
            "DEDUCT" => Ok(TransactionType::Deduct),
            "RESET" => Ok(TransactionType::Reset),
            "REFUND" => Ok(TransactionType::Refund),
            other => Err(LedgerError::Internal(format!(
                "unknown transaction type '{}'",
                other
            ))),
        }
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub client_id: String,
    /// Tenant display name at the time of the transaction
    pub client_name: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Magnitude of the change; direction follows from `kind`
    pub amount: Decimal,
    /// Account balance right after this transaction
    pub balance: Decimal,
    pub description: String,
    pub feature: Option<String>,
    pub order_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A transaction about to be appended. The store assigns `id` and
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCreditTransaction {
    pub client_id: String,
    pub client_name: String,
    pub kind: TransactionType,
    pub amount: Decimal,
    pub balance: Decimal,
    pub description: String,
    pub feature: Option<String>,
    pub order_id: Option<String>,
    pub user_id: Option<String>,
}

impl NewCreditTransaction {
    pub fn into_transaction(self, id: Uuid, created_at: OffsetDateTime) -> CreditTransaction {
        CreditTransaction {
            id,
            client_id: self.client_id,
            client_name: self.client_name,
            kind: self.kind,
            amount: self.amount,
            balance: self.balance,
            description: self.description,
            feature: self.feature,
            order_id: self.order_id,
            user_id: self.user_id,
            created_at,
        }
    }
}

/// Optional filters for [`TransactionLog::list_by_client`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransactionFilter {
    pub order_id: Option<String>,
    pub feature: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<TransactionType>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &CreditTransaction) -> bool {
        if let Some(order_id) = &self.order_id {
            if tx.order_id.as_deref() != Some(order_id.as_str()) {
                return false;
            }
        }
        if let Some(feature) = &self.feature {
            if tx.feature.as_deref() != Some(feature.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if tx.kind != kind {
                return false;
            }
        }
        true
    }
}

/// 1-indexed offset pagination. Out-of-range values are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page: page.clamp(1, u32::MAX as i64) as u32,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE as i64) as u32,
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }

    /// Slice an already-ordered collection down to this page.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total_count = items.len() as u64;
        let items = items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.page_size as usize)
            .collect();
        Page {
            items,
            total_count,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// One page of results plus the size of the whole result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total_count.div_ceil(self.page_size.max(1) as u64)
    }
}

/// Transactions that share an order, or a single standalone transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderGroup {
    /// `None` for a standalone transaction
    pub order_id: Option<String>,
    /// Newest first
    pub transactions: Vec<CreditTransaction>,
    /// Sum of DEDUCT amounts
    pub total_debited: Decimal,
    /// Sum of ADD and REFUND amounts
    pub total_credited: Decimal,
    /// Balance after the group's most recent transaction
    pub latest_balance: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub latest_at: OffsetDateTime,
}

impl OrderGroup {
    fn start(tx: CreditTransaction) -> Self {
        let mut group = Self {
            order_id: tx.order_id.clone(),
            transactions: Vec::new(),
            total_debited: Decimal::ZERO,
            total_credited: Decimal::ZERO,
            latest_balance: tx.balance,
            latest_at: tx.created_at,
        };
        group.push(tx);
        group
    }

    fn push(&mut self, tx: CreditTransaction) {
        match tx.kind {
            TransactionType::Deduct => self.total_debited += tx.amount,
            TransactionType::Add | TransactionType::Refund => self.total_credited += tx.amount,
            TransactionType::Reset => {}
        }
        self.transactions.push(tx);
    }
}

/// Order a client's transactions newest first. Equal timestamps keep the
/// later-appended row first, so `transactions` must be in append order.
pub fn newest_first(mut transactions: Vec<CreditTransaction>) -> Vec<CreditTransaction> {
    transactions.reverse();
    transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    transactions
}

/// Coalesce newest-first transactions into order groups.
///
/// Groups come out ordered by their most recent transaction, which is the
/// first one seen for each order.
pub fn group_by_order(transactions: Vec<CreditTransaction>) -> Vec<OrderGroup> {
    let mut groups: Vec<OrderGroup> = Vec::new();
    let mut by_order: HashMap<String, usize> = HashMap::new();

    for tx in transactions {
        match tx.order_id.clone() {
            Some(order_id) => match by_order.get(&order_id) {
                Some(&idx) => groups[idx].push(tx),
                None => {
                    by_order.insert(order_id, groups.len());
                    groups.push(OrderGroup::start(tx));
                }
            },
            None => groups.push(OrderGroup::start(tx)),
        }
    }

    groups
}

/// Read side of the transaction log
pub struct TransactionLog<S> {
    store: Arc<S>,
}

impl<S> Clone for TransactionLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> TransactionLog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Transactions for a client, newest first.
    pub async fn list_by_client(
        &self,
        client_id: &str,
        page: PageRequest,
        filter: &TransactionFilter,
    ) -> LedgerResult<Page<CreditTransaction>> {
        self.store.list_transactions(client_id, filter, page).await
    }

    /// Transactions for a client coalesced per order.
    pub async fn group_by_order(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> LedgerResult<Page<OrderGroup>> {
        self.store.list_order_groups(client_id, page).await
    }

    /// Most recent transaction for a client, if any.
    pub async fn latest(&self, client_id: &str) -> LedgerResult<Option<CreditTransaction>> {
        self.store.latest_transaction(client_id).await
    }
}
