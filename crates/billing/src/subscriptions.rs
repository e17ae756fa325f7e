//! Subscription lifecycle management
//!
//! This is the ONLY place allowed to write `customers.tier`. All
//! entitlement changes (materialize, extend, cancel, expire) go through
//! this service so the denormalized tier cache can never drift except
//! through a bug here, and the tier-reversion check is always re-run at
//! write time.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::proration;
use streampass_shared::Tier;

/// How a cancellation takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Access ends now; remaining value becomes a manual refund request.
    Immediate,
    /// Auto-renew is switched off; access runs to the natural end date.
    EndOfPeriod,
}

/// Result of a cancellation, surfaced to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub subscription_id: Uuid,
    pub mode: CancelMode,
    #[serde(with = "time::serde::rfc3339")]
    pub access_ends_at: OffsetDateTime,
    /// Remaining value owed back to the customer, if any. Money movement
    /// is manual: this only opens a refund request.
    pub refund_amount_vnd: Option<i64>,
    pub refund_request_id: Option<Uuid>,
}

/// The customer's current entitlement, if any.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CurrentEntitlement {
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub tier: String,
    pub status: String,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
    pub auto_renew: bool,
    pub price_vnd: i64,
}

/// Summary of one expiry sweep run.
#[derive(Debug, Clone, Serialize)]
pub struct ExpirySweepSummary {
    pub expired: usize,
    pub tiers_reverted: usize,
}

pub struct SubscriptionLifecycleManager {
    pool: PgPool,
    email: BillingEmailService,
    event_logger: BillingEventLogger,
}

impl SubscriptionLifecycleManager {
    pub fn new(pool: PgPool, email: BillingEmailService) -> Self {
        let event_logger = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            email,
            event_logger,
        }
    }

    /// Create or extend the entitlement purchased by an approved payment.
    ///
    /// Runs as one transaction: an active row on the same plan is extended
    /// by `duration_months`; an active/past_due row on a different plan
    /// (an in-flight upgrade) is terminated; otherwise a fresh row is
    /// inserted. The customer's tier is set in the same transaction.
    pub async fn materialize(
        &self,
        customer_id: Uuid,
        plan_id: Uuid,
        tier: Tier,
        duration_months: i32,
        actor_type: ActorType,
    ) -> BillingResult<Uuid> {
        if duration_months <= 0 {
            return Err(BillingError::Validation(
                "duration_months must be positive".into(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        // Lock the customer row so two concurrent materializations for the
        // same customer serialize.
        let customer: Option<(String,)> =
            sqlx::query_as("SELECT tier FROM customers WHERE id = $1 FOR UPDATE")
                .bind(customer_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((previous_tier,)) = customer else {
            return Err(BillingError::NotFound(format!(
                "customer {customer_id} not found"
            )));
        };

        let existing: Vec<(Uuid, Uuid, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT id, plan_id, end_date
            FROM subscriptions
            WHERE customer_id = $1 AND status IN ('active', 'past_due')
            FOR UPDATE
            "#,
        )
        .bind(customer_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut same_plan: Option<(Uuid, OffsetDateTime)> = None;
        for (sub_id, existing_plan, end_date) in existing {
            if existing_plan == plan_id && same_plan.is_none() {
                same_plan = Some((sub_id, end_date));
            } else {
                // Terminate the superseded entitlement in the same
                // transaction to preserve the single-active invariant.
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = 'cancelled',
                        cancelled_at = $2,
                        cancellation_reason = 'superseded by plan change',
                        auto_renew = FALSE,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(sub_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        let subscription_id = match same_plan {
            Some((sub_id, end_date)) => {
                // Renewal of the running plan extends from the current end
                // date, never from now.
                let new_end = add_months(end_date, duration_months);
                sqlx::query(
                    "UPDATE subscriptions SET end_date = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(sub_id)
                .bind(new_end)
                .execute(&mut *tx)
                .await?;
                sub_id
            }
            None => {
                let end = add_months(now, duration_months);
                let (sub_id,): (Uuid,) = sqlx::query_as(
                    r#"
                    INSERT INTO subscriptions
                        (customer_id, plan_id, tier, status, start_date, end_date, auto_renew)
                    VALUES ($1, $2, $3, 'active', $4, $5, TRUE)
                    RETURNING id
                    "#,
                )
                .bind(customer_id)
                .bind(plan_id)
                .bind(tier.as_str())
                .bind(now)
                .bind(end)
                .fetch_one(&mut *tx)
                .await?;
                sub_id
            }
        };

        sqlx::query("UPDATE customers SET tier = $2, updated_at = NOW() WHERE id = $1")
            .bind(customer_id)
            .bind(tier.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            customer_id = %customer_id,
            subscription_id = %subscription_id,
            plan_id = %plan_id,
            tier = %tier,
            duration_months = duration_months,
            "Entitlement materialized"
        );

        self.event_logger
            .log_best_effort(
                BillingEventBuilder::new(customer_id, BillingEventType::SubscriptionCreated)
                    .data(serde_json::json!({
                        "subscription_id": subscription_id,
                        "plan_id": plan_id,
                        "tier": tier.as_str(),
                        "duration_months": duration_months,
                    }))
                    .actor_type(actor_type),
            )
            .await;

        if previous_tier != tier.as_str() {
            self.event_logger
                .log_best_effort(
                    BillingEventBuilder::new(customer_id, BillingEventType::TierChanged)
                        .data(serde_json::json!({
                            "from_tier": previous_tier,
                            "to_tier": tier.as_str(),
                        }))
                        .actor_type(actor_type),
                )
                .await;
        }

        Ok(subscription_id)
    }

    /// Admin-only: push the end date out by `additional_months` from the
    /// *current* end date, so repeated extensions compound correctly.
    pub async fn extend(
        &self,
        subscription_id: Uuid,
        additional_months: i32,
        admin_id: Uuid,
    ) -> BillingResult<OffsetDateTime> {
        if additional_months <= 0 {
            return Err(BillingError::Validation(
                "additional_months must be positive".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, String, OffsetDateTime)> = sqlx::query_as(
            "SELECT customer_id, status, end_date FROM subscriptions WHERE id = $1 FOR UPDATE",
        )
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((customer_id, status, end_date)) = row else {
            return Err(BillingError::NotFound(format!(
                "subscription {subscription_id} not found"
            )));
        };

        if status != "active" && status != "past_due" {
            return Err(BillingError::InvalidState(format!(
                "cannot extend a {status} subscription"
            )));
        }

        let new_end = add_months(end_date, additional_months);
        sqlx::query("UPDATE subscriptions SET end_date = $2, updated_at = NOW() WHERE id = $1")
            .bind(subscription_id)
            .bind(new_end)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription_id,
            admin_id = %admin_id,
            additional_months = additional_months,
            new_end = %new_end,
            "Subscription extended"
        );

        self.event_logger
            .log_best_effort(
                BillingEventBuilder::new(customer_id, BillingEventType::SubscriptionExtended)
                    .data(serde_json::json!({
                        "subscription_id": subscription_id,
                        "additional_months": additional_months,
                        "new_end_date": new_end.to_string(),
                    }))
                    .actor(admin_id, ActorType::Admin),
            )
            .await;

        Ok(new_end)
    }

    /// Cancel a subscription.
    ///
    /// Immediate cancellation ends access now, reverts the tier if no
    /// other entitlement remains, and opens a refund request for any
    /// remaining value. End-of-period only disables auto-renew.
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        mode: CancelMode,
        reason: &str,
        actor_id: Uuid,
        actor_type: ActorType,
    ) -> BillingResult<CancellationOutcome> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, Uuid, String, OffsetDateTime, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT customer_id, plan_id, status, start_date, end_date
            FROM subscriptions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((customer_id, plan_id, status, start_date, end_date)) = row else {
            return Err(BillingError::NotFound(format!(
                "subscription {subscription_id} not found"
            )));
        };

        if status != "active" && status != "past_due" {
            return Err(BillingError::InvalidState(format!(
                "cannot cancel a {status} subscription"
            )));
        }

        let outcome = match mode {
            CancelMode::EndOfPeriod => {
                sqlx::query(
                    "UPDATE subscriptions SET auto_renew = FALSE, updated_at = NOW() WHERE id = $1",
                )
                .bind(subscription_id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                CancellationOutcome {
                    subscription_id,
                    mode,
                    access_ends_at: end_date,
                    refund_amount_vnd: None,
                    refund_request_id: None,
                }
            }
            CancelMode::Immediate => {
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = 'cancelled',
                        end_date = $2,
                        auto_renew = FALSE,
                        cancelled_at = $2,
                        cancellation_reason = $3,
                        cancelled_by = $4,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(subscription_id)
                .bind(now)
                .bind(reason)
                .bind(actor_id)
                .execute(&mut *tx)
                .await?;

                Self::revert_tier_if_unsubscribed(&mut tx, customer_id).await?;

                // Ending a paid period early is a refund-triggering event;
                // the manager surfaces the amount but never moves money.
                let price: i64 =
                    sqlx::query_scalar("SELECT price_vnd FROM subscription_plans WHERE id = $1")
                        .bind(plan_id)
                        .fetch_one(&mut *tx)
                        .await?;
                let refund = proration::remaining_value(start_date, end_date, price, now);

                let refund_request_id = if refund > 0 {
                    let (id,): (Uuid,) = sqlx::query_as(
                        r#"
                        INSERT INTO refund_requests
                            (customer_id, subscription_id, amount_vnd, reason, old_plan_id)
                        VALUES ($1, $2, $3, $4, $5)
                        RETURNING id
                        "#,
                    )
                    .bind(customer_id)
                    .bind(subscription_id)
                    .bind(refund)
                    .bind(format!("immediate cancellation: {reason}"))
                    .bind(plan_id)
                    .fetch_one(&mut *tx)
                    .await?;
                    Some(id)
                } else {
                    None
                };

                tx.commit().await?;

                if let Some(request_id) = refund_request_id {
                    self.alert_refund_request(customer_id, refund, "immediate cancellation")
                        .await;
                    self.event_logger
                        .log_best_effort(
                            BillingEventBuilder::new(customer_id, BillingEventType::RefundRequested)
                                .data(serde_json::json!({
                                    "refund_request_id": request_id,
                                    "amount_vnd": refund,
                                    "subscription_id": subscription_id,
                                }))
                                .actor(actor_id, actor_type),
                        )
                        .await;
                }

                CancellationOutcome {
                    subscription_id,
                    mode,
                    access_ends_at: now,
                    refund_amount_vnd: (refund > 0).then_some(refund),
                    refund_request_id,
                }
            }
        };

        tracing::info!(
            subscription_id = %subscription_id,
            customer_id = %customer_id,
            mode = ?mode,
            "Subscription cancelled"
        );

        self.event_logger
            .log_best_effort(
                BillingEventBuilder::new(customer_id, BillingEventType::SubscriptionCancelled)
                    .data(serde_json::json!({
                        "subscription_id": subscription_id,
                        "mode": mode,
                        "reason": reason,
                    }))
                    .actor(actor_id, actor_type),
            )
            .await;

        Ok(outcome)
    }

    /// Open a refund request for a plan downgrade and alert operations.
    ///
    /// The entitlement is deliberately left unchanged: refunds move real
    /// money and must be completed by a human operator.
    pub async fn record_downgrade_request(
        &self,
        customer_id: Uuid,
        subscription_id: Uuid,
        old_plan_id: Uuid,
        new_plan_id: Uuid,
        refund_amount_vnd: i64,
    ) -> BillingResult<Uuid> {
        let (request_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO refund_requests
                (customer_id, subscription_id, amount_vnd, reason, old_plan_id, new_plan_id)
            VALUES ($1, $2, $3, 'plan downgrade', $4, $5)
            RETURNING id
            "#,
        )
        .bind(customer_id)
        .bind(subscription_id)
        .bind(refund_amount_vnd)
        .bind(old_plan_id)
        .bind(new_plan_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            customer_id = %customer_id,
            refund_request_id = %request_id,
            refund_amount_vnd = refund_amount_vnd,
            "Downgrade refund request recorded"
        );

        self.alert_refund_request(customer_id, refund_amount_vnd, "plan downgrade")
            .await;

        self.event_logger
            .log_best_effort(
                BillingEventBuilder::new(customer_id, BillingEventType::RefundRequested)
                    .data(serde_json::json!({
                        "refund_request_id": request_id,
                        "amount_vnd": refund_amount_vnd,
                        "old_plan_id": old_plan_id,
                        "new_plan_id": new_plan_id,
                    }))
                    .actor_type(ActorType::Customer),
            )
            .await;

        Ok(request_id)
    }

    /// Revert the customer's tier to free when no entitlement remains.
    ///
    /// The existence check runs inside the UPDATE itself, at write time,
    /// so a subscription created concurrently in another transaction
    /// cannot be missed by a stale earlier read.
    pub async fn revert_tier_if_unsubscribed(
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
    ) -> BillingResult<bool> {
        let reverted = sqlx::query(
            r#"
            UPDATE customers
            SET tier = 'free', updated_at = NOW()
            WHERE id = $1
              AND tier <> 'free'
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions
                  WHERE customer_id = $1 AND status IN ('active', 'past_due')
              )
            "#,
        )
        .bind(customer_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        Ok(reverted > 0)
    }

    /// Daily sweep: expire every active subscription whose end date has
    /// passed and cascade tier reversion. Safe to run repeatedly; a
    /// second run in the same day finds nothing left to expire.
    pub async fn expire_due_subscriptions(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<ExpirySweepSummary> {
        let mut tx = self.pool.begin().await?;

        // Lock the affected customers before touching their subscription
        // rows. materialize takes locks in the order (customer, then
        // subscriptions); the sweep must match it or the two can deadlock.
        sqlx::query(
            r#"
            SELECT id FROM customers
            WHERE id IN (
                SELECT customer_id FROM subscriptions
                WHERE status = 'active' AND end_date < $1
            )
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let expired: Vec<(Uuid, Uuid, String)> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'active' AND end_date < $1
            RETURNING id, customer_id, tier
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut customers: Vec<Uuid> = expired.iter().map(|(_, c, _)| *c).collect();
        customers.sort_unstable();
        customers.dedup();

        let mut tiers_reverted = 0;
        for customer_id in &customers {
            if Self::revert_tier_if_unsubscribed(&mut tx, *customer_id).await? {
                tiers_reverted += 1;
            }
        }

        tx.commit().await?;

        for (subscription_id, customer_id, tier) in &expired {
            self.event_logger
                .log_best_effort(
                    BillingEventBuilder::new(*customer_id, BillingEventType::SubscriptionExpired)
                        .data(serde_json::json!({
                            "subscription_id": subscription_id,
                            "tier": tier,
                        }))
                        .actor_type(ActorType::System),
                )
                .await;
        }

        Ok(ExpirySweepSummary {
            expired: expired.len(),
            tiers_reverted,
        })
    }

    /// The customer's current active/past_due subscription with its plan
    /// price, used for proration previews.
    pub async fn current_entitlement(
        &self,
        customer_id: Uuid,
    ) -> BillingResult<Option<CurrentEntitlement>> {
        let row = sqlx::query_as::<_, CurrentEntitlement>(
            r#"
            SELECT
                s.id AS subscription_id,
                s.plan_id,
                p.name AS plan_name,
                s.tier,
                s.status,
                s.start_date,
                s.end_date,
                s.auto_renew,
                p.price_vnd
            FROM subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.customer_id = $1 AND s.status IN ('active', 'past_due')
            ORDER BY s.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn alert_refund_request(&self, customer_id: Uuid, amount_vnd: i64, reason: &str) {
        let email: Option<(String,)> = sqlx::query_as("SELECT email FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();

        let customer_email = email.map(|(e,)| e).unwrap_or_else(|| "unknown".to_string());
        self.email
            .send_refund_request_alert(&customer_email, amount_vnd, reason)
            .await;
    }
}

/// Add calendar months, clamping the day to the target month's length
/// (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(dt: OffsetDateTime, months: i32) -> OffsetDateTime {
    let date = dt.date();
    let zero_based = date.year() * 12 + (date.month() as i32 - 1) + months;
    let year = zero_based.div_euclid(12);
    let month_index = zero_based.rem_euclid(12) as u8 + 1;

    let month = match time::Month::try_from(month_index) {
        Ok(m) => m,
        Err(_) => return dt,
    };
    let day = date.day().min(time::util::days_in_year_month(year, month));

    match time::Date::from_calendar_date(year, month, day) {
        Ok(new_date) => dt.replace_date(new_date),
        Err(_) => dt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn add_months_simple() {
        let start = datetime!(2025-03-15 10:00 UTC);
        assert_eq!(add_months(start, 1), datetime!(2025-04-15 10:00 UTC));
        assert_eq!(add_months(start, 12), datetime!(2026-03-15 10:00 UTC));
    }

    #[test]
    fn add_months_clamps_end_of_month() {
        let jan31 = datetime!(2025-01-31 00:00 UTC);
        assert_eq!(add_months(jan31, 1), datetime!(2025-02-28 00:00 UTC));

        let leap = datetime!(2024-01-31 00:00 UTC);
        assert_eq!(add_months(leap, 1), datetime!(2024-02-29 00:00 UTC));
    }

    #[test]
    fn add_months_crosses_year_boundary() {
        let nov = datetime!(2025-11-20 08:30 UTC);
        assert_eq!(add_months(nov, 3), datetime!(2026-02-20 08:30 UTC));
    }

    #[test]
    fn repeated_extension_compounds_from_end_date() {
        // Two 1-month extensions equal one 2-month extension when applied
        // to the end date rather than to "now".
        let end = datetime!(2025-06-30 00:00 UTC);
        let twice = add_months(add_months(end, 1), 1);
        assert_eq!(twice, datetime!(2025-08-30 00:00 UTC));
    }
}
