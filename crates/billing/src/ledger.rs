//! Credit ledger service
//!
//! The only component that changes balances. Every mutation goes through
//! [`LedgerStore::post`], which serialises work per client and commits the
//! account update together with its transaction row.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::account::{ClientCreditAccount, CreditAccounts};
use crate::accounting::{validate_amount, LedgerOp, OverdraftPolicy};
use crate::config::LedgerConfig;
use crate::costs::{normalize_feature, EffectiveCost, FeatureCostTable, FeatureCreditCost};
use crate::error::{LedgerError, LedgerResult};
use crate::invariants::{check_account, InvariantViolation};
use crate::store::{LedgerStore, PostingDraft};
use crate::transactions::{
    CreditTransaction, OrderGroup, Page, PageRequest, TransactionFilter, TransactionLog,
};

/// Who is asking for a posting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingContext {
    /// Acting user; `None` for system-initiated postings
    pub user_id: Option<String>,
    /// Tenant display name to snapshot onto the transaction
    pub client_name: Option<String>,
}

impl PostingContext {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            client_name: None,
        }
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = Some(client_name.into());
        self
    }

    /// Display name for the transaction row; falls back to the client id.
    pub(crate) fn client_name_for(&self, client_id: &str) -> String {
        self.client_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(client_id)
            .to_string()
    }
}

/// Outcome of a successful posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerReceipt {
    pub new_balance: Decimal,
    pub account: ClientCreditAccount,
    pub transaction: CreditTransaction,
}

/// Outcome of onboarding a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    pub account: ClientCreditAccount,
    /// Number of default cost rules created
    pub seeded_costs: usize,
}

pub struct CreditLedger<S> {
    pub costs: FeatureCostTable<S>,
    pub accounts: CreditAccounts<S>,
    pub transactions: TransactionLog<S>,
    store: Arc<S>,
    policy: OverdraftPolicy,
}

impl<S: LedgerStore> CreditLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        let store = Arc::new(store);
        Self {
            costs: FeatureCostTable::new(Arc::clone(&store), config.default_costs),
            accounts: CreditAccounts::new(Arc::clone(&store)),
            transactions: TransactionLog::new(Arc::clone(&store)),
            store,
            policy: config.overdraft,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> OverdraftPolicy {
        self.policy
    }

    /// Grant credits. Creates the account on first use.
    pub async fn add_credits(
        &self,
        client_id: &str,
        amount: Decimal,
        description: &str,
        ctx: &PostingContext,
    ) -> LedgerResult<LedgerReceipt> {
        let amount = validate_amount(amount)?;

        let draft = PostingDraft {
            op: LedgerOp::Add { amount },
            client_name: ctx.client_name_for(client_id),
            description: description_or(description, || "Credits added".to_string()),
            feature: None,
            order_id: None,
            user_id: ctx.user_id.clone(),
        };

        let receipt = self.post(client_id, draft).await?;

        tracing::info!(
            client_id = %client_id,
            amount = %amount,
            new_balance = %receipt.new_balance,
            transaction_id = %receipt.transaction.id,
            "Credits added"
        );

        Ok(receipt)
    }

    /// Charge the client for one use of `feature`.
    ///
    /// When the balance cannot cover the cost nothing is written, not even
    /// the account row.
    pub async fn deduct_credits(
        &self,
        client_id: &str,
        feature: &str,
        order_id: Option<&str>,
        ctx: &PostingContext,
    ) -> LedgerResult<LedgerReceipt> {
        let feature = normalize_feature(feature)?;
        let order_id = order_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from);

        let cost = match self.costs.get_cost(client_id, &feature).await {
            Ok(cost) => cost,
            Err(LedgerError::UnknownFeature(f)) => {
                tracing::error!(
                    client_id = %client_id,
                    feature = %f,
                    "No cost configured for feature"
                );
                return Err(LedgerError::UnknownFeature(f));
            }
            Err(e) => return Err(e),
        };

        let description = match &order_id {
            Some(order_id) => format!("{} for order {}", feature, order_id),
            None => format!("{} usage", feature),
        };

        let draft = PostingDraft {
            op: LedgerOp::Deduct { cost },
            client_name: ctx.client_name_for(client_id),
            description,
            feature: Some(feature.clone()),
            order_id: order_id.clone(),
            user_id: ctx.user_id.clone(),
        };

        match self.post(client_id, draft).await {
            Ok(receipt) => {
                tracing::info!(
                    client_id = %client_id,
                    feature = %feature,
                    order_id = ?order_id,
                    cost = %cost,
                    new_balance = %receipt.new_balance,
                    "Credits deducted"
                );
                Ok(receipt)
            }
            Err(LedgerError::InsufficientCredit { balance, required }) => {
                tracing::warn!(
                    client_id = %client_id,
                    feature = %feature,
                    order_id = ?order_id,
                    balance = %balance,
                    required = %required,
                    "Insufficient credits, deduction rejected"
                );
                Err(LedgerError::InsufficientCredit { balance, required })
            }
            Err(e) => Err(e),
        }
    }

    /// Administrative override of both running totals.
    pub async fn reset_credits(
        &self,
        client_id: &str,
        total_added: Decimal,
        total_used: Decimal,
        ctx: &PostingContext,
    ) -> LedgerResult<LedgerReceipt> {
        let draft = PostingDraft {
            op: LedgerOp::Reset {
                total_added,
                total_used,
            },
            client_name: ctx.client_name_for(client_id),
            description: "Credits reset by administrator".to_string(),
            feature: None,
            order_id: None,
            user_id: ctx.user_id.clone(),
        };

        let receipt = self.post(client_id, draft).await?;

        tracing::info!(
            client_id = %client_id,
            total_added = %receipt.account.total_added,
            total_used = %receipt.account.total_used,
            new_balance = %receipt.new_balance,
            user_id = ?ctx.user_id,
            "Credits reset"
        );

        Ok(receipt)
    }

    pub async fn get_client_credits(&self, client_id: &str) -> LedgerResult<ClientCreditAccount> {
        self.accounts.get(client_id).await
    }

    /// Explicit provisioning of a zero-balance account.
    pub async fn ensure_account(&self, client_id: &str) -> LedgerResult<ClientCreditAccount> {
        self.accounts.ensure_exists(client_id).await
    }

    /// Onboard a client: account plus its own copy of the default prices.
    pub async fn provision_client(&self, client_id: &str) -> LedgerResult<ProvisionResult> {
        let account = self.ensure_account(client_id).await?;
        let seeded_costs = self.costs.seed_defaults(client_id).await?;
        Ok(ProvisionResult {
            account,
            seeded_costs,
        })
    }

    pub async fn get_credit_transactions(
        &self,
        client_id: &str,
        page: PageRequest,
        filter: &TransactionFilter,
    ) -> LedgerResult<Page<CreditTransaction>> {
        let mut filter = filter.clone();
        filter.feature = match filter.feature.as_deref().map(str::trim) {
            Some(feature) if !feature.is_empty() => Some(normalize_feature(feature)?),
            _ => None,
        };
        self.transactions
            .list_by_client(client_id, page, &filter)
            .await
    }

    pub async fn get_credit_transactions_by_order(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> LedgerResult<Page<OrderGroup>> {
        self.transactions.group_by_order(client_id, page).await
    }

    /// Check one client's account against its latest transaction.
    pub async fn verify_client(&self, client_id: &str) -> LedgerResult<Vec<InvariantViolation>> {
        let account = self.accounts.get(client_id).await?;
        let latest = self.transactions.latest(client_id).await?;
        let violations = check_account(&account, latest.as_ref(), self.policy);

        for violation in &violations {
            tracing::error!(
                client_id = %client_id,
                invariant = %violation.invariant,
                severity = %violation.severity,
                "{}",
                violation.description
            );
        }

        Ok(violations)
    }

    pub async fn get_feature_cost(&self, client_id: &str, feature: &str) -> LedgerResult<Decimal> {
        self.costs.get_cost(client_id, feature).await
    }

    pub async fn set_feature_cost(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
    ) -> LedgerResult<FeatureCreditCost> {
        self.costs.set_cost(client_id, feature, cost).await
    }

    pub async fn set_feature_rule(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
        is_active: bool,
    ) -> LedgerResult<FeatureCreditCost> {
        self.costs.set_rule(client_id, feature, cost, is_active).await
    }

    pub async fn list_feature_costs(&self, client_id: &str) -> LedgerResult<Vec<EffectiveCost>> {
        self.costs.list_costs(client_id).await
    }

    pub(crate) async fn post(
        &self,
        client_id: &str,
        draft: PostingDraft,
    ) -> LedgerResult<LedgerReceipt> {
        let kind = draft.op.transaction_type();
        match self.store.post(client_id, draft, self.policy).await {
            Ok((account, transaction)) => Ok(LedgerReceipt {
                new_balance: account.balance,
                account,
                transaction,
            }),
            Err(e) => {
                if !e.is_business_rule() {
                    tracing::error!(
                        client_id = %client_id,
                        kind = %kind,
                        error = %e,
                        "Ledger posting failed"
                    );
                }
                Err(e)
            }
        }
    }
}

pub(crate) fn description_or(description: &str, fallback: impl FnOnce() -> String) -> String {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}
