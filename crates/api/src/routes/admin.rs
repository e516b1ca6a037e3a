//! Platform admin credit routes
//!
//! All routes here require the `super_admin` role. They act on the tenant
//! named in the path rather than the caller's own tenant.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use courierdesk_billing::{
    ClientCreditAccount, CreditTransaction, InvariantCheckSummary, InvariantChecker,
    InvariantViolation, LedgerReceipt, OrderGroup, Page, PostingContext, ProvisionResult,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{PageQuery, TransactionsQuery};
use crate::{
    auth::CallerContext,
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    /// Display name to snapshot onto the transaction
    pub client_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetCreditsRequest {
    pub total_added: Decimal,
    pub total_used: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RefundOrderRequest {
    pub order_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvariantsQuery {
    /// Run a single named check instead of all of them
    pub check: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyClientResponse {
    pub client_id: String,
    pub healthy: bool,
    pub violations: Vec<InvariantViolation>,
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Posting context for an operator acting on another tenant
fn operator_context(caller: &CallerContext, client_name: Option<String>) -> PostingContext {
    let ctx = PostingContext::user(caller.user_id.clone());
    match client_name {
        Some(name) => ctx.with_client_name(name),
        None => ctx,
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn get_client_credits(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<ClientCreditAccount>> {
    caller.require_super_admin()?;
    let account = state.ledger.get_client_credits(&client_id).await?;
    Ok(Json(account))
}

pub async fn list_client_transactions(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<Page<CreditTransaction>>> {
    caller.require_super_admin()?;
    let page = state
        .ledger
        .get_credit_transactions(&client_id, query.page_request(), &query.filter()?)
        .await?;
    Ok(Json(page))
}

pub async fn list_client_transactions_by_order(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<OrderGroup>>> {
    caller.require_super_admin()?;
    let page = state
        .ledger
        .get_credit_transactions_by_order(&client_id, query.page_request())
        .await?;
    Ok(Json(page))
}

/// Grant credits to a tenant
pub async fn add_credits(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
    Json(req): Json<AddCreditsRequest>,
) -> ApiResult<Json<LedgerReceipt>> {
    caller.require_super_admin()?;

    let receipt = state
        .ledger
        .add_credits(
            &client_id,
            req.amount,
            &req.description,
            &operator_context(&caller, req.client_name),
        )
        .await?;

    tracing::info!(
        admin_user_id = %caller.user_id,
        client_id = %client_id,
        amount = %req.amount,
        "Admin granted credits"
    );

    Ok(Json(receipt))
}

/// Override a tenant's running totals
pub async fn reset_credits(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
    Json(req): Json<ResetCreditsRequest>,
) -> ApiResult<Json<LedgerReceipt>> {
    caller.require_super_admin()?;

    let receipt = state
        .ledger
        .reset_credits(
            &client_id,
            req.total_added,
            req.total_used,
            &operator_context(&caller, None),
        )
        .await?;

    tracing::warn!(
        admin_user_id = %caller.user_id,
        client_id = %client_id,
        total_added = %req.total_added,
        total_used = %req.total_used,
        "Admin reset tenant credits"
    );

    Ok(Json(receipt))
}

/// Refund what is still charged to an order
pub async fn refund_order(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
    Json(req): Json<RefundOrderRequest>,
) -> ApiResult<Json<LedgerReceipt>> {
    caller.require_super_admin()?;

    let receipt = state
        .ledger
        .refund_order(
            &client_id,
            &req.order_id,
            req.reason.as_deref(),
            &operator_context(&caller, None),
        )
        .await?;

    Ok(Json(receipt))
}

/// Onboard a tenant: zero account plus default prices
pub async fn provision_client(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<ProvisionResult>> {
    caller.require_super_admin()?;
    let result = state.ledger.provision_client(&client_id).await?;
    Ok(Json(result))
}

/// Check one tenant's account against its history
pub async fn verify_client(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<VerifyClientResponse>> {
    caller.require_super_admin()?;
    let violations = state.ledger.verify_client(&client_id).await?;
    Ok(Json(VerifyClientResponse {
        client_id,
        healthy: violations.is_empty(),
        violations,
    }))
}

/// Run the database-wide invariant sweep
pub async fn run_invariants(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Query(query): Query<InvariantsQuery>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    caller.require_super_admin()?;

    let checker = state.invariant_checker().ok_or_else(|| {
        ApiError::NotSupported("Invariant sweep requires the Postgres ledger store".to_string())
    })?;

    let summary = match query.check.as_deref() {
        Some(name) => {
            if !InvariantChecker::available_checks().contains(&name) {
                return Err(ApiError::Validation(format!(
                    "Unknown invariant check '{}'",
                    name
                )));
            }
            InvariantCheckSummary::from_violations(1, checker.run_check(name).await?)
        }
        None => checker.run_all_checks().await?,
    };

    tracing::info!(
        admin_user_id = %caller.user_id,
        checks_run = summary.checks_run,
        violations = summary.violations.len(),
        healthy = summary.healthy,
        "Ledger invariant sweep completed"
    );

    Ok(Json(summary))
}
