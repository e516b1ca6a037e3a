// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Postgres ledger store tests
//!
//! Need a database: `DATABASE_URL=postgres://... cargo test -- --ignored`

use std::sync::Arc;

use courierdesk_billing::{
    CreditLedger, InvariantChecker, LedgerConfig, LedgerError, OverdraftPolicy, PageRequest,
    PgLedgerStore, PostingContext, TransactionFilter, TransactionType,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Barrier;
use uuid::Uuid;

async fn pg_ledger() -> CreditLedger<PgLedgerStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("connect to Postgres");

    let store = PgLedgerStore::new(pool);
    store.migrate().await.expect("run migrations");
    CreditLedger::new(store, LedgerConfig::default())
}

/// Fresh tenant per test so runs never collide.
fn client_id() -> String {
    format!("test-{}", Uuid::new_v4())
}

// =============================================================================
// Grant, use and history round trip through Postgres
// =============================================================================
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postings_persist_with_audit_rows() {
    let ledger = pg_ledger().await;
    let client = client_id();
    let ctx = PostingContext::user("ops").with_client_name("Acme");

    ledger
        .add_credits(&client, Decimal::from(10), "Grant", &ctx)
        .await
        .unwrap();
    ledger
        .deduct_credits(&client, "WHATSAPP_NOTIFICATION", Some("o-1"), &ctx)
        .await
        .unwrap();

    let account = ledger.get_client_credits(&client).await.unwrap();
    assert_eq!(account.balance, Decimal::new(95, 1));
    assert_eq!(account.total_used, Decimal::new(5, 1));

    let history = ledger
        .get_credit_transactions(&client, PageRequest::default(), &TransactionFilter::default())
        .await
        .unwrap();
    assert_eq!(history.total_count, 2);
    assert_eq!(history.items[0].kind, TransactionType::Deduct);
    assert_eq!(history.items[0].balance, Decimal::new(95, 1));
    assert_eq!(history.items[1].client_name, "Acme");

    assert!(ledger.verify_client(&client).await.unwrap().is_empty());
}

// =============================================================================
// Rejected deduction rolls back the provisional account row
// =============================================================================
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rejected_deduction_leaves_no_account() {
    let ledger = pg_ledger().await;
    let client = client_id();

    let err = ledger
        .deduct_credits(&client, "ORDER", None, &PostingContext::system())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientCredit { .. }));
    assert!(matches!(
        ledger.get_client_credits(&client).await,
        Err(LedgerError::AccountNotFound(_))
    ));
}

// =============================================================================
// Row lock serialises concurrent deductions
// =============================================================================
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_deductions_of_60() {
    let ledger = Arc::new(pg_ledger().await);
    let client = client_id();
    ledger
        .set_feature_cost(&client, "IMAGE_PROCESSING", Decimal::from(60))
        .await
        .unwrap();
    ledger
        .add_credits(&client, Decimal::from(100), "Grant", &PostingContext::system())
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = vec![];
    for _ in 0..2 {
        let ledger = Arc::clone(&ledger);
        let barrier = Arc::clone(&barrier);
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ledger
                .deduct_credits(&client, "IMAGE_PROCESSING", None, &PostingContext::system())
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1);

    let account = ledger.get_client_credits(&client).await.unwrap();
    assert_eq!(account.balance, Decimal::from(40));
}

// =============================================================================
// Grouping and refunds use SQL aggregation
// =============================================================================
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_order_groups_and_refund() {
    let ledger = pg_ledger().await;
    let client = client_id();
    let ctx = PostingContext::system();

    ledger
        .add_credits(&client, Decimal::from(10), "Grant", &ctx)
        .await
        .unwrap();
    ledger
        .deduct_credits(&client, "ORDER", Some("o-5"), &ctx)
        .await
        .unwrap();
    ledger
        .deduct_credits(&client, "ADDRESS_PARSING", Some("o-6"), &ctx)
        .await
        .unwrap();
    ledger
        .deduct_credits(&client, "IMAGE_PROCESSING", Some("o-5"), &ctx)
        .await
        .unwrap();

    let groups = ledger
        .get_credit_transactions_by_order(&client, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(groups.total_count, 3);
    assert_eq!(groups.items[0].order_id.as_deref(), Some("o-5"));
    assert_eq!(groups.items[0].total_debited, Decimal::from(3));
    assert_eq!(groups.items[2].order_id, None);

    let receipt = ledger.refund_order(&client, "o-5", None, &ctx).await.unwrap();
    assert_eq!(receipt.transaction.amount, Decimal::from(3));
    assert!(matches!(
        ledger.refund_order(&client, "o-5", None, &ctx).await,
        Err(LedgerError::NothingToRefund(_))
    ));
}

// =============================================================================
// Invariant sweep over the whole database
// =============================================================================
#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_invariant_sweep_runs() {
    let ledger = pg_ledger().await;
    let checker = InvariantChecker::new(ledger.store().pool().clone(), OverdraftPolicy::Disallow);

    let summary = checker.run_all_checks().await.unwrap();
    assert_eq!(
        summary.checks_run,
        InvariantChecker::available_checks().len()
    );
    assert_eq!(
        summary.checks_passed + summary.checks_failed,
        summary.checks_run
    );
}
