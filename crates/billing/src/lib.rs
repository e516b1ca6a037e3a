// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // LedgerError::InsufficientCredit carries two decimals
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CourierDesk Billing Module
//!
//! Credit ledger for tenants of the logistics platform. Tenants ("clients")
//! prepay credits and are charged per billable feature use.
//!
//! ## Features
//!
//! - **Feature Costs**: Per-tenant price list with system-wide defaults
//! - **Credit Accounts**: Balance plus running totals, one per tenant
//! - **Transaction Log**: Append-only history of every balance change
//! - **Ledger Service**: Grants, deductions, resets and order refunds, each
//!   applied atomically with its audit row
//! - **Invariants**: Runnable consistency checks over accounts and history
//!
//! Storage is pluggable: [`PgLedgerStore`] for production and
//! [`MemoryLedgerStore`] for tests and single-node development.

pub mod account;
pub mod accounting;
pub mod config;
pub mod costs;
pub mod error;
pub mod invariants;
pub mod ledger;
pub mod refund;
pub mod store;
pub mod transactions;


// Accounts
pub use account::{ClientCreditAccount, CreditAccounts};

// Accounting
pub use accounting::{AccountTotals, LedgerOp, OverdraftPolicy, AMOUNT_SCALE};

// Config
pub use config::LedgerConfig;

// Costs
pub use costs::{
    CostSource, DefaultCosts, EffectiveCost, FeatureCostTable, FeatureCreditCost,
    STANDARD_FEATURE_COSTS,
};

// Error
pub use error::{LedgerError, LedgerResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{CreditLedger, LedgerReceipt, PostingContext, ProvisionResult};

// Store
pub use store::{LedgerBackend, LedgerStore, MemoryLedgerStore, PgLedgerStore};

// Transactions
pub use transactions::{
    CreditTransaction, OrderGroup, Page, PageRequest, TransactionFilter, TransactionLog,
    TransactionType, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
