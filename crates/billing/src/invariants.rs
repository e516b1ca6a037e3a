//! Ledger Invariants Module
//!
//! Runnable consistency checks for the credit ledger. They can be run after
//! any posting, on a schedule from the worker, or on demand from the admin
//! API.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::account::ClientCreditAccount;
use crate::accounting::OverdraftPolicy;
use crate::error::LedgerResult;
use crate::transactions::CreditTransaction;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Client(s) affected
    pub client_ids: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - balances or history are wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

impl InvariantCheckSummary {
    /// Summarize the violations found by `checks_run` checks
    pub fn from_violations(checks_run: usize, violations: Vec<InvariantViolation>) -> Self {
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Self {
            checked_at: OffsetDateTime::now_utc(),
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

/// Row type for conservation violation
#[derive(Debug, sqlx::FromRow)]
struct ConservationRow {
    client_id: String,
    balance: Decimal,
    total_added: Decimal,
    total_used: Decimal,
}

/// Row type for balance below floor violation
#[derive(Debug, sqlx::FromRow)]
struct NegativeBalanceRow {
    client_id: String,
    balance: Decimal,
}

/// Row type for snapshot mismatch violation
#[derive(Debug, sqlx::FromRow)]
struct SnapshotMismatchRow {
    client_id: String,
    account_balance: Decimal,
    transaction_id: Option<Uuid>,
    transaction_balance: Option<Decimal>,
}

/// Row type for negative amount violation
#[derive(Debug, sqlx::FromRow)]
struct NegativeAmountRow {
    id: Uuid,
    client_id: String,
    kind: String,
    amount: Decimal,
}

/// Row type for untagged deduction violation
#[derive(Debug, sqlx::FromRow)]
struct UntaggedDeductionRow {
    client_id: String,
    untagged_count: i64,
}

fn conservation_violation(
    client_id: &str,
    balance: Decimal,
    total_added: Decimal,
    total_used: Decimal,
) -> InvariantViolation {
    InvariantViolation {
        invariant: "balance_matches_totals".to_string(),
        client_ids: vec![client_id.to_string()],
        description: format!(
            "Balance {} does not equal total_added {} - total_used {}",
            balance, total_added, total_used
        ),
        context: serde_json::json!({
            "balance": balance,
            "total_added": total_added,
            "total_used": total_used,
        }),
        severity: ViolationSeverity::Critical,
    }
}

fn negative_balance_violation(
    client_id: &str,
    balance: Decimal,
    floor: Decimal,
) -> InvariantViolation {
    InvariantViolation {
        invariant: "non_negative_balance".to_string(),
        client_ids: vec![client_id.to_string()],
        description: format!("Balance {} is below the allowed floor {}", balance, floor),
        context: serde_json::json!({
            "balance": balance,
            "floor": floor,
        }),
        severity: ViolationSeverity::High,
    }
}

fn snapshot_violation(
    client_id: &str,
    account_balance: Decimal,
    transaction_id: Option<Uuid>,
    transaction_balance: Option<Decimal>,
) -> InvariantViolation {
    let description = match transaction_balance {
        Some(tx_balance) => format!(
            "Account balance {} differs from latest transaction balance {}",
            account_balance, tx_balance
        ),
        None => format!(
            "Account balance {} has no transaction history",
            account_balance
        ),
    };
    InvariantViolation {
        invariant: "snapshot_matches_latest_transaction".to_string(),
        client_ids: vec![client_id.to_string()],
        description,
        context: serde_json::json!({
            "account_balance": account_balance,
            "transaction_id": transaction_id,
            "transaction_balance": transaction_balance,
        }),
        severity: ViolationSeverity::Critical,
    }
}

/// Check a single account against its most recent transaction.
///
/// Runs the per-account invariants without a database, so it works with any
/// store.
pub fn check_account(
    account: &ClientCreditAccount,
    latest: Option<&CreditTransaction>,
    policy: OverdraftPolicy,
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    if account.balance != account.total_added - account.total_used {
        violations.push(conservation_violation(
            &account.client_id,
            account.balance,
            account.total_added,
            account.total_used,
        ));
    }

    if !policy.permits(account.balance) {
        violations.push(negative_balance_violation(
            &account.client_id,
            account.balance,
            policy.floor(),
        ));
    }

    match latest {
        Some(tx) if tx.balance != account.balance => violations.push(snapshot_violation(
            &account.client_id,
            account.balance,
            Some(tx.id),
            Some(tx.balance),
        )),
        // A provisioned account that was never posted to is at zero
        None if !account.balance.is_zero() => violations.push(snapshot_violation(
            &account.client_id,
            account.balance,
            None,
            None,
        )),
        _ => {}
    }

    violations
}

/// Service for running ledger invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
    policy: OverdraftPolicy,
}

impl InvariantChecker {
    pub fn new(pool: PgPool, policy: OverdraftPolicy) -> Self {
        Self { pool, policy }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> LedgerResult<InvariantCheckSummary> {
        let mut violations = Vec::new();

        violations.extend(self.check_balance_matches_totals().await?);
        violations.extend(self.check_non_negative_balance().await?);
        violations.extend(self.check_snapshot_matches_latest_transaction().await?);
        violations.extend(self.check_transaction_amounts_non_negative().await?);
        violations.extend(self.check_deductions_tagged_with_feature().await?);

        Ok(InvariantCheckSummary::from_violations(
            Self::available_checks().len(),
            violations,
        ))
    }

    /// Invariant 1: balance = total_added - total_used
    async fn check_balance_matches_totals(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<ConservationRow> = sqlx::query_as(
            r#"
            SELECT client_id, balance, total_added, total_used
            FROM client_credit_accounts
            WHERE balance <> total_added - total_used
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                conservation_violation(
                    &row.client_id,
                    row.balance,
                    row.total_added,
                    row.total_used,
                )
            })
            .collect())
    }

    /// Invariant 2: No balance below the configured overdraft floor
    async fn check_non_negative_balance(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let floor = self.policy.floor();
        let rows: Vec<NegativeBalanceRow> = sqlx::query_as(
            r#"
            SELECT client_id, balance
            FROM client_credit_accounts
            WHERE balance < $1
            "#,
        )
        .bind(floor)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| negative_balance_violation(&row.client_id, row.balance, floor))
            .collect())
    }

    /// Invariant 3: Account balance equals the balance recorded on its most
    /// recent transaction
    ///
    /// A mismatch means a balance changed without an audit row.
    async fn check_snapshot_matches_latest_transaction(
        &self,
    ) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<SnapshotMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                a.client_id,
                a.balance AS account_balance,
                t.id AS transaction_id,
                t.balance AS transaction_balance
            FROM client_credit_accounts a
            LEFT JOIN LATERAL (
                SELECT id, balance
                FROM credit_transactions
                WHERE client_id = a.client_id
                ORDER BY created_at DESC, seq DESC
                LIMIT 1
            ) t ON TRUE
            WHERE (t.id IS NULL AND a.balance <> 0)
               OR (t.id IS NOT NULL AND t.balance <> a.balance)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                snapshot_violation(
                    &row.client_id,
                    row.account_balance,
                    row.transaction_id,
                    row.transaction_balance,
                )
            })
            .collect())
    }

    /// Invariant 4: Transaction amounts are magnitudes
    async fn check_transaction_amounts_non_negative(
        &self,
    ) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeAmountRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, kind, amount
            FROM credit_transactions
            WHERE amount < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "transaction_amounts_non_negative".to_string(),
                client_ids: vec![row.client_id],
                description: format!(
                    "{} transaction {} has negative amount {}",
                    row.kind, row.id, row.amount
                ),
                context: serde_json::json!({
                    "transaction_id": row.id,
                    "type": row.kind,
                    "amount": row.amount,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Every deduction names the feature it paid for
    async fn check_deductions_tagged_with_feature(
        &self,
    ) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<UntaggedDeductionRow> = sqlx::query_as(
            r#"
            SELECT client_id, COUNT(*) AS untagged_count
            FROM credit_transactions
            WHERE kind = 'DEDUCT' AND feature IS NULL
            GROUP BY client_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "deductions_tagged_with_feature".to_string(),
                client_ids: vec![row.client_id],
                description: format!(
                    "{} deduction(s) have no feature recorded",
                    row.untagged_count
                ),
                context: serde_json::json!({
                    "untagged_count": row.untagged_count,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> LedgerResult<Vec<InvariantViolation>> {
        match name {
            "balance_matches_totals" => self.check_balance_matches_totals().await,
            "non_negative_balance" => self.check_non_negative_balance().await,
            "snapshot_matches_latest_transaction" => {
                self.check_snapshot_matches_latest_transaction().await
            }
            "transaction_amounts_non_negative" => {
                self.check_transaction_amounts_non_negative().await
            }
            "deductions_tagged_with_feature" => self.check_deductions_tagged_with_feature().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "balance_matches_totals",
            "non_negative_balance",
            "snapshot_matches_latest_transaction",
            "transaction_amounts_non_negative",
            "deductions_tagged_with_feature",
        ]
    }
}
