//! Entitlement reconciliation
//!
//! Approval is two-phase: the payment flips to succeeded in one
//! transaction and the entitlement materializes in another. A crash in
//! between leaves a customer who paid but got nothing. This sweep finds
//! those payments and retries materialization, one attempt per payment
//! per run, alerting operations when a repair fails.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::BillingResult;
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::payments::PurchaseIntent;
use crate::subscriptions::SubscriptionLifecycleManager;
use streampass_shared::Tier;

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub orphaned_found: usize,
    pub repaired: usize,
    pub failed: usize,
}

pub struct ReconciliationSweep {
    pool: PgPool,
    email: BillingEmailService,
    subscriptions: SubscriptionLifecycleManager,
    event_logger: BillingEventLogger,
}

impl ReconciliationSweep {
    pub fn new(pool: PgPool, email: BillingEmailService) -> Self {
        Self {
            subscriptions: SubscriptionLifecycleManager::new(pool.clone(), email.clone()),
            event_logger: BillingEventLogger::new(pool.clone()),
            pool,
            email,
        }
    }

    /// Find succeeded payments with no subscription row created at or
    /// after their verification time and retry materialization.
    ///
    /// Materialization is idempotent against double-repair: a concurrent
    /// grant of the same plan shows up as an extension, which is why the
    /// detection query re-checks the subscription table rather than any
    /// flag on the payment.
    pub async fn run(&self) -> BillingResult<ReconciliationSummary> {
        let orphaned: Vec<(Uuid, Uuid, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT p.id, p.customer_id, p.intent
            FROM payments p
            WHERE p.status = 'succeeded'
              AND p.verified_at IS NOT NULL
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s
                  WHERE s.customer_id = p.customer_id
                    AND s.plan_id =
                        COALESCE(p.intent->>'plan_id', p.intent->>'new_plan_id')::uuid
                    AND (s.created_at >= p.verified_at OR s.updated_at >= p.verified_at)
              )
            ORDER BY p.verified_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut repaired = 0;
        let mut failed = 0;

        for (payment_id, customer_id, intent_json) in &orphaned {
            let intent: PurchaseIntent = match serde_json::from_value(intent_json.clone()) {
                Ok(i) => i,
                Err(e) => {
                    tracing::error!(
                        payment_id = %payment_id,
                        error = %e,
                        "Orphaned payment has unreadable intent, skipping"
                    );
                    failed += 1;
                    continue;
                }
            };
            let tier: Tier = match intent.tier().parse() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(
                        payment_id = %payment_id,
                        error = %e,
                        "Orphaned payment has unknown tier, skipping"
                    );
                    failed += 1;
                    continue;
                }
            };

            match self
                .subscriptions
                .materialize(
                    *customer_id,
                    intent.plan_id(),
                    tier,
                    intent.duration_months(),
                    ActorType::System,
                )
                .await
            {
                Ok(subscription_id) => {
                    repaired += 1;
                    tracing::info!(
                        payment_id = %payment_id,
                        customer_id = %customer_id,
                        subscription_id = %subscription_id,
                        "Reconciliation repaired orphaned payment"
                    );
                    self.event_logger
                        .log_best_effort(
                            BillingEventBuilder::new(
                                *customer_id,
                                BillingEventType::ReconciliationRepair,
                            )
                            .data(serde_json::json!({
                                "payment_id": payment_id,
                                "subscription_id": subscription_id,
                            }))
                            .actor_type(ActorType::System),
                        )
                        .await;
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        payment_id = %payment_id,
                        customer_id = %customer_id,
                        error = %e,
                        "Reconciliation repair failed; will retry next run"
                    );
                }
            }
        }

        if failed > 0 {
            self.email
                .send_refund_request_alert(
                    "reconciliation",
                    0,
                    &format!("{failed} succeeded payment(s) still missing their entitlement"),
                )
                .await;
        }

        if !orphaned.is_empty() {
            tracing::warn!(
                orphaned = orphaned.len(),
                repaired = repaired,
                failed = failed,
                "Reconciliation sweep completed with findings"
            );
        }

        Ok(ReconciliationSummary {
            orphaned_found: orphaned.len(),
            repaired,
            failed,
        })
    }
}
