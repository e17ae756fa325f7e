//! StreamPass background worker
//!
//! Scheduled jobs:
//! - Subscription expiry sweep (daily at 00:10 UTC)
//! - Renewal reminders, 7-day lookahead (daily at 09:00 UTC)
//! - Entitlement reconciliation sweep (hourly)
//! - Health check heartbeat (every 5 minutes)
//!
//! No job touches pending payments: payment expiry is computed at read
//! time, and a late bank transfer can still be matched by hand.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use streampass_billing::{BillingEmailService, ReconciliationSweep, SubscriptionLifecycleManager};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

async fn create_db_pool() -> anyhow::Result<Option<sqlx::PgPool>> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(Some(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting StreamPass worker");

    let Some(pool) = create_db_pool().await? else {
        // No database configured: stay alive so the deployment is healthy,
        // but do nothing.
        warn!("DATABASE_URL not set - running in minimal mode");
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            info!("Worker heartbeat (minimal mode)");
        }
    };

    let email = BillingEmailService::from_env();
    if !email.is_enabled() {
        warn!("RESEND_API_KEY not set - reminder emails will be skipped");
    }

    let lifecycle = Arc::new(SubscriptionLifecycleManager::new(
        pool.clone(),
        email.clone(),
    ));
    let reconciliation = Arc::new(ReconciliationSweep::new(pool.clone(), email.clone()));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Expire lapsed subscriptions shortly after midnight UTC. The
    // sweep is idempotent; a re-run after a crash finds nothing left.
    let expiry_lifecycle = lifecycle.clone();
    scheduler
        .add(Job::new_async("0 10 0 * * *", move |_uuid, _l| {
            let lifecycle = expiry_lifecycle.clone();
            Box::pin(async move {
                info!("Running subscription expiry sweep");
                match lifecycle
                    .expire_due_subscriptions(OffsetDateTime::now_utc())
                    .await
                {
                    Ok(summary) => {
                        info!(
                            expired = summary.expired,
                            tiers_reverted = summary.tiers_reverted,
                            "Expiry sweep complete"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Expiry sweep failed");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: subscription expiry sweep (daily 00:10 UTC)");

    // Job 2: Renewal reminders for subscriptions ending within 7 days.
    // One send failure does not stop the run; counts are logged and the
    // next daily run retries anyone still in the window.
    let reminder_pool = pool.clone();
    let reminder_email = email.clone();
    scheduler
        .add(Job::new_async("0 0 9 * * *", move |_uuid, _l| {
            let pool = reminder_pool.clone();
            let email = reminder_email.clone();
            Box::pin(async move {
                info!("Running renewal reminder job");

                let due: Vec<(Uuid, String, String, OffsetDateTime)> = sqlx::query_as(
                    r#"
                    SELECT s.id, c.email, s.tier, s.end_date
                    FROM subscriptions s
                    JOIN customers c ON c.id = s.customer_id
                    WHERE s.status = 'active'
                      AND s.end_date > NOW()
                      AND s.end_date <= NOW() + INTERVAL '7 days'
                    "#,
                )
                .fetch_all(&pool)
                .await
                .unwrap_or_else(|e| {
                    error!(error = %e, "Failed to load subscriptions for reminders");
                    Vec::new()
                });

                let total = due.len();
                let mut sent = 0;
                let mut failed = 0;
                for (subscription_id, customer_email, tier, end_date) in due {
                    let delivered = email
                        .send_renewal_reminder(
                            &customer_email,
                            &tier,
                            &end_date.date().to_string(),
                        )
                        .await;
                    if delivered {
                        sent += 1;
                        tracing::debug!(
                            subscription_id = %subscription_id,
                            "Renewal reminder dispatched"
                        );
                    } else {
                        // No in-run retry; tomorrow's run still finds the
                        // subscription while it is in the window.
                        failed += 1;
                        warn!(
                            subscription_id = %subscription_id,
                            "Renewal reminder send failed"
                        );
                    }
                }

                info!(
                    total = total,
                    sent = sent,
                    failed = failed,
                    "Renewal reminder run complete"
                );
            })
        })?)
        .await?;
    info!("Scheduled: renewal reminders (daily 09:00 UTC, 7-day lookahead)");

    // Job 3: Reconciliation sweep for succeeded payments missing their
    // entitlement.
    let sweep = reconciliation.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let sweep = sweep.clone();
            Box::pin(async move {
                info!("Running entitlement reconciliation sweep");
                match sweep.run().await {
                    Ok(summary) => {
                        if summary.orphaned_found > 0 {
                            warn!(
                                orphaned = summary.orphaned_found,
                                repaired = summary.repaired,
                                failed = summary.failed,
                                "Reconciliation sweep found orphaned payments"
                            );
                        } else {
                            info!("Reconciliation sweep clean");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: reconciliation sweep (hourly)");

    // Job 4: Heartbeat.
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    // Keep the process alive; the scheduler runs on background tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
