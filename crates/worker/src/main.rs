//! CourierDesk Background Worker
//!
//! Handles scheduled jobs:
//! - Credit ledger invariant sweep (hourly by default, `INVARIANT_SWEEP_CRON`)

use std::time::Duration;

use courierdesk_billing::{
    InvariantCheckSummary, InvariantChecker, LedgerConfig, ViolationSeverity,
};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_SWEEP_CRON: &str = "0 0 * * * *";

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Log results of an invariant sweep
fn log_sweep_results(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(
            checks_run = summary.checks_run,
            "Ledger invariant sweep complete: healthy"
        );
        return;
    }

    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Ledger invariant sweep found violations"
    );

    for violation in &summary.violations {
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                client_ids = ?violation.client_ids,
                context = %violation.context,
                "{}",
                violation.description
            ),
            ViolationSeverity::Medium | ViolationSeverity::Low => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                client_ids = ?violation.client_ids,
                context = %violation.context,
                "{}",
                violation.description
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting CourierDesk Worker");

    let ledger_config = LedgerConfig::from_env()?;
    let sweep_cron =
        std::env::var("INVARIANT_SWEEP_CRON").unwrap_or_else(|_| DEFAULT_SWEEP_CRON.to_string());

    let pool = create_db_pool().await?;
    let checker = InvariantChecker::new(pool, ledger_config.overdraft);

    // Run once on startup so problems surface before the first tick
    match checker.run_all_checks().await {
        Ok(summary) => log_sweep_results(&summary),
        Err(e) => error!(error = %e, "Initial ledger invariant sweep failed"),
    }

    let scheduler = JobScheduler::new().await?;

    scheduler
        .add(Job::new_async(sweep_cron.as_str(), move |_uuid, _l| {
            let checker = checker.clone();
            Box::pin(async move {
                info!("Running scheduled ledger invariant sweep");
                match checker.run_all_checks().await {
                    Ok(summary) => log_sweep_results(&summary),
                    Err(e) => error!(error = %e, "Ledger invariant sweep failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %sweep_cron, "Scheduled: Ledger invariant sweep");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("CourierDesk Worker started successfully");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
