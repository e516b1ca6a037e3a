//! HTTP routes

pub mod admin;
pub mod credits;
#[cfg(test)]
mod route_tests;

use axum::{
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use courierdesk_billing::{PageRequest, TransactionFilter, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};

use crate::{
    auth::require_caller,
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/credits", get(credits::get_credits))
        .route("/credits/transactions", get(credits::list_transactions))
        .route(
            "/credits/transactions/by-order",
            get(credits::list_transactions_by_order),
        )
        .route("/credits/deduct", post(credits::deduct))
        .route("/credits/feature-costs", get(credits::list_feature_costs))
        .route(
            "/credits/feature-costs/{feature}",
            put(credits::set_feature_cost),
        )
        .route(
            "/admin/clients/{client_id}/credits",
            get(admin::get_client_credits),
        )
        .route(
            "/admin/clients/{client_id}/credits/transactions",
            get(admin::list_client_transactions),
        )
        .route(
            "/admin/clients/{client_id}/credits/by-order",
            get(admin::list_client_transactions_by_order),
        )
        .route(
            "/admin/clients/{client_id}/credits/add",
            post(admin::add_credits),
        )
        .route(
            "/admin/clients/{client_id}/credits/reset",
            post(admin::reset_credits),
        )
        .route(
            "/admin/clients/{client_id}/credits/refund",
            post(admin::refund_order),
        )
        .route(
            "/admin/clients/{client_id}/credits/provision",
            post(admin::provision_client),
        )
        .route(
            "/admin/clients/{client_id}/credits/verify",
            get(admin::verify_client),
        )
        .route("/admin/ledger/invariants", get(admin::run_invariants))
        .route_layer(middleware::from_fn(require_caller));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// =============================================================================
// Shared query types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(DEFAULT_PAGE_SIZE as i64),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub order_id: Option<String>,
    pub feature: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl TransactionsQuery {
    pub fn page_request(&self) -> PageRequest {
        PageQuery {
            page: self.page,
            page_size: self.page_size,
        }
        .page_request()
    }

    pub fn filter(&self) -> ApiResult<TransactionFilter> {
        let kind = match self.kind.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => Some(
                kind.parse()
                    .map_err(|_| ApiError::Validation(format!("Unknown transaction type '{}'", kind)))?,
            ),
            _ => None,
        };

        Ok(TransactionFilter {
            order_id: self
                .order_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from),
            feature: self.feature.clone(),
            kind,
        })
    }
}
