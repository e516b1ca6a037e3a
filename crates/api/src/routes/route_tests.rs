//! Router tests against the in-memory ledger
//!
//! Requests go through the full router (caller middleware, extractors,
//! error mapping) via `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used)]

use std::str::FromStr;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::create_router;
use crate::state::AppState;

// =============================================================================
// Helpers
// =============================================================================

const SUPER_ADMIN: (&str, &str, &str) = ("op-1", "platform", "super_admin");
const ACME_USER: (&str, &str, &str) = ("u-1", "acme", "user");
const ACME_ADMIN: (&str, &str, &str) = ("u-2", "acme", "admin");

fn app() -> Router {
    create_router(AppState::in_memory())
}

fn request(
    method: &str,
    uri: &str,
    caller: Option<(&str, &str, &str)>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user_id, client_id, role)) = caller {
        builder = builder
            .header("x-user-id", user_id)
            .header("x-client-id", client_id)
            .header("x-user-role", role);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

async fn grant(app: &Router, client_id: &str, amount: &str) -> Value {
    let (status, body) = send(
        app,
        request(
            "POST",
            &format!("/api/admin/clients/{}/credits/add", client_id),
            Some(SUPER_ADMIN),
            Some(json!({ "amount": amount, "description": "Top-up" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "grant failed: {}", body);
    body
}

async fn deduct(app: &Router, feature: &str, order_id: Option<&str>) -> (StatusCode, Value) {
    send(
        app,
        request(
            "POST",
            "/api/credits/deduct",
            Some(ACME_USER),
            Some(json!({ "feature": feature, "order_id": order_id })),
        ),
    )
    .await
}

// =============================================================================
// Health and auth
// =============================================================================

#[tokio::test]
async fn test_health_needs_no_caller() {
    let (status, body) = send(&app(), request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_caller_headers_is_unauthorized() {
    let (status, body) = send(&app(), request("GET", "/api/credits", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn test_admin_routes_require_super_admin() {
    let app = app();
    for caller in [ACME_USER, ACME_ADMIN] {
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/api/admin/clients/acme/credits/add",
                Some(caller),
                Some(json!({ "amount": "100" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    // Nothing was granted, so no account exists
    let (status, body) = send(&app, request("GET", "/api/credits", Some(ACME_USER), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}

// =============================================================================
// Credit flow
// =============================================================================

#[tokio::test]
async fn test_unknown_client_is_not_found() {
    let app = app();
    let (status, body) = send(&app, request("GET", "/api/credits", Some(ACME_USER), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);

    // Provisioning creates the zero account
    send(
        &app,
        request(
            "POST",
            "/api/admin/clients/acme/credits/provision",
            Some(SUPER_ADMIN),
            None,
        ),
    )
    .await;
    let (status, body) = send(&app, request("GET", "/api/credits", Some(ACME_USER), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["client_id"], "acme");
    assert_eq!(dec(&body["balance"]), Decimal::ZERO);
}

#[tokio::test]
async fn test_grant_then_deduct() {
    let app = app();
    let receipt = grant(&app, "acme", "10").await;
    assert_eq!(dec(&receipt["new_balance"]), Decimal::from(10));
    assert_eq!(receipt["transaction"]["type"], "ADD");
    assert_eq!(receipt["transaction"]["user_id"], "op-1");

    let (status, body) = deduct(&app, "WHATSAPP_NOTIFICATION", Some("ORD-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&body["new_balance"]), Decimal::new(95, 1));
    assert_eq!(body["transaction"]["type"], "DEDUCT");
    assert_eq!(body["transaction"]["feature"], "WHATSAPP_NOTIFICATION");
    assert_eq!(body["transaction"]["order_id"], "ORD-1");

    let (_, account) = send(&app, request("GET", "/api/credits", Some(ACME_USER), None)).await;
    assert_eq!(dec(&account["balance"]), Decimal::new(95, 1));
    assert_eq!(dec(&account["total_used"]), Decimal::new(5, 1));
}

#[tokio::test]
async fn test_insufficient_credit_is_payment_required() {
    let app = app();
    grant(&app, "acme", "0.5").await;

    let (status, body) = deduct(&app, "ORDER", Some("ORD-1")).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(dec(&body["balance"]), Decimal::new(5, 1));
    assert_eq!(dec(&body["required"]), Decimal::ONE);

    // Balance untouched, no DEDUCT recorded
    let (_, page) = send(
        &app,
        request("GET", "/api/credits/transactions", Some(ACME_USER), None),
    )
    .await;
    assert_eq!(page["total_count"], 1);
    assert_eq!(page["items"][0]["type"], "ADD");
}

#[tokio::test]
async fn test_unknown_feature_is_bad_request() {
    let app = app();
    grant(&app, "acme", "10").await;
    let (status, _) = deduct(&app, "TELEPORTATION", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_grant_amount_is_bad_request() {
    let app = app();
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/admin/clients/acme/credits/add",
            Some(SUPER_ADMIN),
            Some(json!({ "amount": "-5" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_overrides_totals() {
    let app = app();
    grant(&app, "acme", "10").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/admin/clients/acme/credits/reset",
            Some(SUPER_ADMIN),
            Some(json!({ "total_added": "50", "total_used": "20" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&body["new_balance"]), Decimal::from(30));
    assert_eq!(body["transaction"]["type"], "RESET");

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/admin/clients/acme/credits/reset",
            Some(SUPER_ADMIN),
            Some(json!({ "total_added": "10", "total_used": "20" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refund_only_once() {
    let app = app();
    grant(&app, "acme", "10").await;
    deduct(&app, "ORDER", Some("ORD-9")).await;
    deduct(&app, "ADDRESS_PARSING", Some("ORD-9")).await;

    let refund = || {
        request(
            "POST",
            "/api/admin/clients/acme/credits/refund",
            Some(SUPER_ADMIN),
            Some(json!({ "order_id": "ORD-9", "reason": "Order cancelled" })),
        )
    };

    let (status, body) = send(&app, refund()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&body["transaction"]["amount"]), Decimal::from(2));
    assert_eq!(dec(&body["new_balance"]), Decimal::from(10));

    let (status, _) = send(&app, refund()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_transactions_paginate_newest_first() {
    let app = app();
    grant(&app, "acme", "100").await;
    for i in 0..25 {
        let (status, _) = deduct(&app, "ORDER", Some(format!("ORD-{}", i).as_str())).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, first) = send(
        &app,
        request(
            "GET",
            "/api/credits/transactions?page=1&page_size=20",
            Some(ACME_USER),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["total_count"], 26);
    assert_eq!(first["items"].as_array().unwrap().len(), 20);
    assert_eq!(first["items"][0]["order_id"], "ORD-24");

    let (_, second) = send(
        &app,
        request(
            "GET",
            "/api/credits/transactions?page=2&page_size=20",
            Some(ACME_USER),
            None,
        ),
    )
    .await;
    let items = second["items"].as_array().unwrap();
    assert_eq!(items.len(), 6);
    assert_eq!(items.last().unwrap()["type"], "ADD");
}

#[tokio::test]
async fn test_transactions_filter_by_type() {
    let app = app();
    grant(&app, "acme", "10").await;
    deduct(&app, "ORDER", Some("ORD-1")).await;

    let (status, page) = send(
        &app,
        request(
            "GET",
            "/api/credits/transactions?type=DEDUCT",
            Some(ACME_USER),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_count"], 1);
    assert_eq!(page["items"][0]["type"], "DEDUCT");

    let (status, _) = send(
        &app,
        request(
            "GET",
            "/api/credits/transactions?type=GIFT",
            Some(ACME_USER),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transactions_grouped_by_order() {
    let app = app();
    grant(&app, "acme", "10").await;
    deduct(&app, "ORDER", Some("ORD-1")).await;
    deduct(&app, "WHATSAPP_NOTIFICATION", Some("ORD-1")).await;
    deduct(&app, "ORDER", Some("ORD-2")).await;

    let (status, page) = send(
        &app,
        request(
            "GET",
            "/api/admin/clients/acme/credits/by-order",
            Some(SUPER_ADMIN),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_count"], 3);

    let groups = page["items"].as_array().unwrap();
    let ord1 = groups.iter().find(|g| g["order_id"] == "ORD-1").unwrap();
    assert_eq!(ord1["transactions"].as_array().unwrap().len(), 2);
    assert_eq!(dec(&ord1["total_debited"]), Decimal::new(15, 1));
}

#[tokio::test]
async fn test_tenant_reads_are_scoped_to_caller() {
    let app = app();
    grant(&app, "acme", "10").await;
    grant(&app, "globex", "99").await;

    let (_, body) = send(&app, request("GET", "/api/credits", Some(ACME_USER), None)).await;
    assert_eq!(dec(&body["balance"]), Decimal::from(10));
}

// =============================================================================
// Feature costs
// =============================================================================

#[tokio::test]
async fn test_feature_cost_override_requires_tenant_admin() {
    let app = app();
    let put = |caller| {
        request(
            "PUT",
            "/api/credits/feature-costs/order",
            Some(caller),
            Some(json!({ "cost": "2.5" })),
        )
    };

    let (status, _) = send(&app, put(ACME_USER)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, rule) = send(&app, put(ACME_ADMIN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rule["feature"], "ORDER");
    assert_eq!(dec(&rule["cost"]), Decimal::new(25, 1));

    grant(&app, "acme", "10").await;
    let (_, body) = deduct(&app, "ORDER", Some("ORD-1")).await;
    assert_eq!(dec(&body["new_balance"]), Decimal::new(75, 1));
}

#[tokio::test]
async fn test_inactive_feature_cost_never_charged() {
    let app = app();
    grant(&app, "acme", "10").await;

    let (status, rule) = send(
        &app,
        request(
            "PUT",
            "/api/credits/feature-costs/ORDER",
            Some(ACME_ADMIN),
            Some(json!({ "cost": "4", "is_active": false })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rule["is_active"], false);
    assert_eq!(dec(&rule["cost"]), Decimal::from(4));

    // Default price still applies
    let (_, body) = deduct(&app, "ORDER", Some("ORD-1")).await;
    assert_eq!(dec(&body["new_balance"]), Decimal::from(9));
}

#[tokio::test]
async fn test_list_feature_costs_includes_defaults() {
    let (status, body) = send(
        &app(),
        request("GET", "/api/credits/feature-costs", Some(ACME_USER), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let features: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["feature"].as_str().unwrap())
        .collect();
    assert!(features.contains(&"ORDER"));
    assert!(features.contains(&"WHATSAPP_NOTIFICATION"));
}

// =============================================================================
// Admin operations
// =============================================================================

#[tokio::test]
async fn test_provision_and_verify_client() {
    let app = app();
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/admin/clients/acme/credits/provision",
            Some(SUPER_ADMIN),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&body["account"]["balance"]), Decimal::ZERO);

    grant(&app, "acme", "5").await;

    let (status, body) = send(
        &app,
        request(
            "GET",
            "/api/admin/clients/acme/credits/verify",
            Some(SUPER_ADMIN),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert!(body["violations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invariant_sweep_not_supported_in_memory() {
    let (status, body) = send(
        &app(),
        request(
            "GET",
            "/api/admin/ledger/invariants",
            Some(SUPER_ADMIN),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["code"], 501);
}
