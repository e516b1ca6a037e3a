//! Server configuration

use std::str::FromStr;

use courierdesk_billing::{LedgerConfig, LedgerError};

/// Which ledger store backs the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "memory" => Ok(StoreKind::Memory),
            other => Err(ConfigError::Invalid {
                var: "LEDGER_STORE",
                reason: format!("expected 'postgres' or 'memory', got '{}'", other),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub ledger_store: StoreKind,
    /// Required when `ledger_store` is Postgres
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub ledger: LedgerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let ledger_store = match var("LEDGER_STORE") {
            Some(value) => value.parse()?,
            None => StoreKind::Postgres,
        };

        let database_url = var("DATABASE_URL");
        if ledger_store == StoreKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "DATABASE_MAX_CONNECTIONS",
                reason: format!("'{}' is not a positive integer", value),
            })?,
            None => 10,
        };

        let run_migrations = var("RUN_MIGRATIONS")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        Ok(Self {
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            ledger_store,
            database_url,
            database_max_connections,
            run_migrations,
            ledger: LedgerConfig::from_env()?,
        })
    }

    /// In-memory configuration for tests and local experiments.
    pub fn in_memory() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            ledger_store: StoreKind::Memory,
            database_url: None,
            database_max_connections: 1,
            run_migrations: false,
            ledger: LedgerConfig::default(),
        }
    }
}
