//! Tenant credit routes
//!
//! Every route acts on the caller's own tenant (`x-client-id`).

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use courierdesk_billing::{
    ClientCreditAccount, CreditTransaction, EffectiveCost, FeatureCreditCost, LedgerReceipt,
    OrderGroup, Page,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{PageQuery, TransactionsQuery};
use crate::{auth::CallerContext, error::ApiResult, state::AppState};

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    pub feature: String,
    pub order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetFeatureCostRequest {
    pub cost: Decimal,
    /// Defaults to active
    pub is_active: Option<bool>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Get the caller's credit account
pub async fn get_credits(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
) -> ApiResult<Json<ClientCreditAccount>> {
    let account = state.ledger.get_client_credits(&caller.client_id).await?;
    Ok(Json(account))
}

/// List the caller's transactions, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<Page<CreditTransaction>>> {
    let page = state
        .ledger
        .get_credit_transactions(&caller.client_id, query.page_request(), &query.filter()?)
        .await?;
    Ok(Json(page))
}

/// List the caller's transactions grouped by order
pub async fn list_transactions_by_order(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<OrderGroup>>> {
    let page = state
        .ledger
        .get_credit_transactions_by_order(&caller.client_id, query.page_request())
        .await?;
    Ok(Json(page))
}

/// Charge the caller's tenant for one use of a feature
///
/// Called by the order workflow before it performs billable work. A 402
/// response means the work must not proceed.
pub async fn deduct(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Json(req): Json<DeductRequest>,
) -> ApiResult<Json<LedgerReceipt>> {
    let receipt = state
        .ledger
        .deduct_credits(
            &caller.client_id,
            &req.feature,
            req.order_id.as_deref(),
            &caller.posting_context(),
        )
        .await?;
    Ok(Json(receipt))
}

/// Effective price list for the caller's tenant
pub async fn list_feature_costs(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
) -> ApiResult<Json<Vec<EffectiveCost>>> {
    let costs = state.ledger.list_feature_costs(&caller.client_id).await?;
    Ok(Json(costs))
}

/// Set the caller's tenant price for a feature (tenant admins only)
pub async fn set_feature_cost(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(feature): Path<String>,
    Json(req): Json<SetFeatureCostRequest>,
) -> ApiResult<Json<FeatureCreditCost>> {
    caller.require_tenant_admin()?;

    let rule = state
        .ledger
        .set_feature_rule(
            &caller.client_id,
            &feature,
            req.cost,
            req.is_active.unwrap_or(true),
        )
        .await?;

    tracing::info!(
        user_id = %caller.user_id,
        client_id = %caller.client_id,
        feature = %rule.feature,
        cost = %rule.cost,
        is_active = rule.is_active,
        "Tenant feature cost changed"
    );

    Ok(Json(rule))
}
