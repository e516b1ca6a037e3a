//! Application state

use std::sync::Arc;

use courierdesk_billing::{
    CreditLedger, InvariantChecker, LedgerBackend, MemoryLedgerStore, PgLedgerStore,
};
use sqlx::postgres::PgPoolOptions;

use crate::config::{Config, StoreKind};

pub type Ledger = CreditLedger<LedgerBackend>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub ledger: Arc<Ledger>,
}

impl AppState {
    pub fn new(config: Config, backend: LedgerBackend) -> Self {
        tracing::info!(
            store = backend.name(),
            overdraft = ?config.ledger.overdraft,
            default_features = config.ledger.default_costs.len(),
            "Credit ledger initialized"
        );
        let ledger = Arc::new(CreditLedger::new(backend, config.ledger.clone()));
        Self { config, ledger }
    }

    /// Connect the configured store, running migrations when enabled.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let backend = match config.ledger_store {
            StoreKind::Memory => {
                tracing::warn!("Using in-memory ledger store - balances are lost on restart");
                LedgerBackend::Memory(MemoryLedgerStore::new())
            }
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

                tracing::info!("Connecting to database...");
                let pool = PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .connect(url)
                    .await?;
                tracing::info!("Database connection established");

                let store = PgLedgerStore::new(pool);
                if config.run_migrations {
                    tracing::info!("Running database migrations...");
                    store.migrate().await?;
                } else {
                    tracing::info!("Database migrations skipped (RUN_MIGRATIONS=false)");
                }
                LedgerBackend::Postgres(store)
            }
        };

        Ok(Self::new(config, backend))
    }

    /// In-memory state for tests.
    pub fn in_memory() -> Self {
        Self::new(
            Config::in_memory(),
            LedgerBackend::Memory(MemoryLedgerStore::new()),
        )
    }

    /// Database-wide invariant checker; only available on Postgres.
    pub fn invariant_checker(&self) -> Option<InvariantChecker> {
        self.ledger
            .store()
            .pg_pool()
            .map(|pool| InvariantChecker::new(pool.clone(), self.ledger.policy()))
    }
}
