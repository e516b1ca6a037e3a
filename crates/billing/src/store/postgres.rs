//! Postgres ledger store
//!
//! Postings run in one database transaction: the account row is locked with
//! `SELECT ... FOR UPDATE`, the change is planned, then the account update
//! and the transaction insert commit together. Any early return drops the
//! transaction, which rolls everything back.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{LedgerStore, PostingDraft};
use crate::account::ClientCreditAccount;
use crate::accounting::{plan, OverdraftPolicy};
use crate::costs::FeatureCreditCost;
use crate::error::{LedgerError, LedgerResult};
use crate::transactions::{
    group_by_order, CreditTransaction, NewCreditTransaction, OrderGroup, Page, PageRequest,
    TransactionFilter,
};

const ACCOUNT_COLUMNS: &str = "client_id, balance, total_added, total_used, updated_at";

const TRANSACTION_COLUMNS: &str = "id, client_id, client_name, kind, amount, balance, \
     description, feature, order_id, user_id, created_at";

const COST_COLUMNS: &str = "client_id, feature, cost, is_active, updated_at";

/// Row type for client_credit_accounts
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    client_id: String,
    balance: Decimal,
    total_added: Decimal,
    total_used: Decimal,
    updated_at: OffsetDateTime,
}

impl From<AccountRow> for ClientCreditAccount {
    fn from(row: AccountRow) -> Self {
        Self {
            client_id: row.client_id,
            balance: row.balance,
            total_added: row.total_added,
            total_used: row.total_used,
            updated_at: row.updated_at,
        }
    }
}

/// Row type for credit_transactions
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    client_id: String,
    client_name: String,
    kind: String,
    amount: Decimal,
    balance: Decimal,
    description: String,
    feature: Option<String>,
    order_id: Option<String>,
    user_id: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<TransactionRow> for CreditTransaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            client_id: row.client_id,
            client_name: row.client_name,
            kind: row.kind.parse()?,
            amount: row.amount,
            balance: row.balance,
            description: row.description,
            feature: row.feature,
            order_id: row.order_id,
            user_id: row.user_id,
            created_at: row.created_at,
        })
    }
}

/// Row type for feature_credit_costs
#[derive(Debug, sqlx::FromRow)]
struct CostRow {
    client_id: String,
    feature: String,
    cost: Decimal,
    is_active: bool,
    updated_at: OffsetDateTime,
}

impl From<CostRow> for FeatureCreditCost {
    fn from(row: CostRow) -> Self {
        Self {
            client_id: row.client_id,
            feature: row.feature,
            cost: row.cost,
            is_active: row.is_active,
            updated_at: row.updated_at,
        }
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> LedgerResult<Vec<CreditTransaction>> {
    rows.into_iter().map(CreditTransaction::try_from).collect()
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the ledger schema migrations bundled with this crate.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Ledger migrations applied");
        Ok(())
    }

    /// Insert one immutable transaction row inside the posting transaction.
    async fn append(
        tx: &mut Transaction<'_, Postgres>,
        entry: NewCreditTransaction,
    ) -> LedgerResult<CreditTransaction> {
        // clock_timestamp() rather than NOW(): the row is written after the
        // account lock is held, so per-client timestamps follow lock order.
        let row: TransactionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO credit_transactions (
                id, client_id, client_name, kind, amount, balance,
                description, feature, order_id, user_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, clock_timestamp())
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&entry.client_id)
        .bind(&entry.client_name)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.balance)
        .bind(&entry.description)
        .bind(&entry.feature)
        .bind(&entry.order_id)
        .bind(&entry.user_id)
        .fetch_one(&mut **tx)
        .await?;

        row.try_into()
    }

    /// Net amount still charged to an order (DEDUCT minus REFUND).
    async fn order_net_charged(
        tx: &mut Transaction<'_, Postgres>,
        client_id: &str,
        order_id: &str,
    ) -> LedgerResult<Decimal> {
        let net: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(
                CASE kind
                    WHEN 'DEDUCT' THEN amount
                    WHEN 'REFUND' THEN -amount
                    ELSE 0
                END
            ), 0)
            FROM credit_transactions
            WHERE client_id = $1 AND order_id = $2
            "#,
        )
        .bind(client_id)
        .bind(order_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(net)
    }
}

impl LedgerStore for PgLedgerStore {
    async fn find_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
    ) -> LedgerResult<Option<FeatureCreditCost>> {
        let row: Option<CostRow> = sqlx::query_as(&format!(
            "SELECT {COST_COLUMNS} FROM feature_credit_costs WHERE client_id = $1 AND feature = $2"
        ))
        .bind(client_id)
        .bind(feature)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn upsert_cost_rule(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
        is_active: bool,
    ) -> LedgerResult<FeatureCreditCost> {
        let row: CostRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO feature_credit_costs (client_id, feature, cost, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (client_id, feature) DO UPDATE SET
                cost = EXCLUDED.cost,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            RETURNING {COST_COLUMNS}
            "#
        ))
        .bind(client_id)
        .bind(feature)
        .bind(cost)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn set_cost_rule_active(
        &self,
        client_id: &str,
        feature: &str,
        is_active: bool,
    ) -> LedgerResult<Option<FeatureCreditCost>> {
        let row: Option<CostRow> = sqlx::query_as(&format!(
            r#"
            UPDATE feature_credit_costs
            SET is_active = $3, updated_at = NOW()
            WHERE client_id = $1 AND feature = $2
            RETURNING {COST_COLUMNS}
            "#
        ))
        .bind(client_id)
        .bind(feature)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_cost_rule_if_absent(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
    ) -> LedgerResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO feature_credit_costs (client_id, feature, cost, is_active)
            VALUES ($1, $2, $3, true)
            ON CONFLICT (client_id, feature) DO NOTHING
            "#,
        )
        .bind(client_id)
        .bind(feature)
        .bind(cost)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn list_cost_rules(&self, client_id: &str) -> LedgerResult<Vec<FeatureCreditCost>> {
        let rows: Vec<CostRow> = sqlx::query_as(&format!(
            "SELECT {COST_COLUMNS} FROM feature_credit_costs WHERE client_id = $1 ORDER BY feature"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_account(&self, client_id: &str) -> LedgerResult<Option<ClientCreditAccount>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM client_credit_accounts WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn ensure_account(&self, client_id: &str) -> LedgerResult<ClientCreditAccount> {
        sqlx::query(
            "INSERT INTO client_credit_accounts (client_id) VALUES ($1) ON CONFLICT (client_id) DO NOTHING",
        )
        .bind(client_id)
        .execute(&self.pool)
        .await?;

        self.find_account(client_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(client_id.to_string()))
    }

    async fn post(
        &self,
        client_id: &str,
        draft: PostingDraft,
        policy: OverdraftPolicy,
    ) -> LedgerResult<(ClientCreditAccount, CreditTransaction)> {
        let mut tx = self.pool.begin().await?;

        // Provisional insert so there is always a row to lock. It rolls back
        // with everything else if the posting is rejected.
        sqlx::query(
            "INSERT INTO client_credit_accounts (client_id) VALUES ($1) ON CONFLICT (client_id) DO NOTHING",
        )
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

        let current: AccountRow = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM client_credit_accounts WHERE client_id = $1 FOR UPDATE"
        ))
        .bind(client_id)
        .fetch_one(&mut *tx)
        .await?;
        let before = ClientCreditAccount::from(current).totals();

        let refundable = match draft.op.refund_order_id() {
            Some(order_id) => Some(Self::order_net_charged(&mut tx, client_id, order_id).await?),
            None => None,
        };

        let posting = plan(&before, &draft.op, refundable, policy)?;

        let updated: AccountRow = sqlx::query_as(&format!(
            r#"
            UPDATE client_credit_accounts SET
                balance = $2,
                total_added = $3,
                total_used = $4,
                updated_at = clock_timestamp()
            WHERE client_id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(client_id)
        .bind(posting.after.balance)
        .bind(posting.after.total_added)
        .bind(posting.after.total_used)
        .fetch_one(&mut *tx)
        .await?;

        let transaction = Self::append(&mut tx, draft.into_entry(client_id, &posting)).await?;

        tx.commit().await?;

        Ok((updated.into(), transaction))
    }

    async fn list_transactions(
        &self,
        client_id: &str,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<CreditTransaction>> {
        const FILTERS: &str = r#"
            client_id = $1
              AND ($2::TEXT IS NULL OR order_id = $2)
              AND ($3::TEXT IS NULL OR feature = $3)
              AND ($4::TEXT IS NULL OR kind = $4)
        "#;
        let kind = filter.kind.map(|k| k.as_str());

        let total_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM credit_transactions WHERE {FILTERS}"
        ))
        .bind(client_id)
        .bind(filter.order_id.as_deref())
        .bind(filter.feature.as_deref())
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM credit_transactions
            WHERE {FILTERS}
            ORDER BY created_at DESC, seq DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(client_id)
        .bind(filter.order_id.as_deref())
        .bind(filter.feature.as_deref())
        .bind(kind)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: into_transactions(rows)?,
            total_count: total_count.max(0) as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn list_order_groups(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> LedgerResult<Page<OrderGroup>> {
        // Standalone rows get a key of their own so they never merge with an
        // order.
        const GROUP_KEY: &str = "COALESCE('order:' || order_id, 'txn:' || id::TEXT)";

        let total_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(DISTINCT {GROUP_KEY}) FROM credit_transactions WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;

        let keys: Vec<String> = sqlx::query_scalar(&format!(
            r#"
            SELECT group_key FROM (
                SELECT {GROUP_KEY} AS group_key,
                       MAX(created_at) AS latest_at,
                       MAX(seq) AS latest_seq
                FROM credit_transactions
                WHERE client_id = $1
                GROUP BY 1
            ) groups
            ORDER BY latest_at DESC, latest_seq DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(client_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let rows: Vec<TransactionRow> = if keys.is_empty() {
            Vec::new()
        } else {
            sqlx::query_as(&format!(
                r#"
                SELECT {TRANSACTION_COLUMNS}
                FROM credit_transactions
                WHERE client_id = $1 AND {GROUP_KEY} = ANY($2)
                ORDER BY created_at DESC, seq DESC
                "#
            ))
            .bind(client_id)
            .bind(&keys)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(Page {
            items: group_by_order(into_transactions(rows)?),
            total_count: total_count.max(0) as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn latest_transaction(&self, client_id: &str) -> LedgerResult<Option<CreditTransaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM credit_transactions
            WHERE client_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CreditTransaction::try_from).transpose()
    }
}
