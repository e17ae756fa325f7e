//! Billing invariant checks
//!
//! Read-only audits over the billing tables. These never mutate data;
//! they surface rows that violate the rules the write paths are supposed
//! to enforce, so drift from bugs or manual database edits is caught
//! instead of compounding.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Money or entitlement is wrong for a customer right now.
    Critical,
    /// Bookkeeping inconsistency, not customer-visible yet.
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    pub check: &'static str,
    pub severity: Severity,
    pub customer_id: Option<Uuid>,
    pub detail: String,
}

/// Result of a full invariant audit.
#[derive(Debug, Clone, Serialize)]
pub struct InvariantReport {
    pub checks_run: usize,
    pub violations: Vec<InvariantViolation>,
}

impl InvariantReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn critical_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Critical)
            .count()
    }
}

pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run every check and collect the violations.
    pub async fn run_all(&self) -> BillingResult<InvariantReport> {
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_tier_matches_subscription().await?);
        violations.extend(self.check_succeeded_payment_has_entitlement().await?);
        violations.extend(self.check_promotion_usage_within_limits().await?);
        violations.extend(self.check_cancelled_has_cancelled_at().await?);

        Ok(InvariantReport {
            checks_run: 5,
            violations,
        })
    }

    /// At most one active/past_due subscription per customer.
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT customer_id, COUNT(*)
            FROM subscriptions
            WHERE status IN ('active', 'past_due')
            GROUP BY customer_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(customer_id, count)| InvariantViolation {
                check: "single_active_subscription",
                severity: Severity::Critical,
                customer_id: Some(customer_id),
                detail: format!("{count} concurrent active/past_due subscriptions"),
            })
            .collect())
    }

    /// The denormalized `customers.tier` must match the entitlement:
    /// entitled customers carry their subscription's tier, everyone else
    /// is free.
    async fn check_tier_matches_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let mismatched: Vec<(Uuid, String, String)> = sqlx::query_as(
            r#"
            SELECT c.id, c.tier, s.tier
            FROM customers c
            JOIN subscriptions s ON s.customer_id = c.id
            WHERE s.status IN ('active', 'past_due')
              AND c.tier <> s.tier
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let stale_paid: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT c.id, c.tier
            FROM customers c
            WHERE c.tier <> 'free'
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s
                  WHERE s.customer_id = c.id AND s.status IN ('active', 'past_due')
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut violations: Vec<InvariantViolation> = mismatched
            .into_iter()
            .map(|(id, cached, actual)| InvariantViolation {
                check: "tier_matches_subscription",
                severity: Severity::Critical,
                customer_id: Some(id),
                detail: format!("cached tier {cached} but subscription tier {actual}"),
            })
            .collect();
        violations.extend(stale_paid.into_iter().map(|(id, tier)| InvariantViolation {
            check: "tier_matches_subscription",
            severity: Severity::Critical,
            customer_id: Some(id),
            detail: format!("cached tier {tier} with no entitlement"),
        }));

        Ok(violations)
    }

    /// Every succeeded payment should have produced an entitlement. The
    /// reconciliation sweep repairs these; the check existing here too
    /// catches the case where the sweep itself is broken or not running.
    async fn check_succeeded_payment_has_entitlement(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT p.id, p.customer_id
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
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(payment_id, customer_id)| InvariantViolation {
                check: "succeeded_payment_has_entitlement",
                severity: Severity::Critical,
                customer_id: Some(customer_id),
                detail: format!("payment {payment_id} succeeded without entitlement"),
            })
            .collect())
    }

    /// `current_uses` must equal the usage rows and never exceed
    /// `max_uses`, and no customer may appear twice for one promotion
    /// (the unique constraint should make that impossible).
    async fn check_promotion_usage_within_limits(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid, String, i32, Option<i32>, i64)> = sqlx::query_as(
            r#"
            SELECT p.id, p.code, p.current_uses, p.max_uses, COUNT(u.id)
            FROM promotions p
            LEFT JOIN promotion_usages u ON u.promotion_id = p.id
            GROUP BY p.id, p.code, p.current_uses, p.max_uses
            HAVING p.current_uses <> COUNT(u.id)
                OR (p.max_uses IS NOT NULL AND COUNT(u.id) > p.max_uses)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, code, current_uses, max_uses, actual)| InvariantViolation {
                    check: "promotion_usage_within_limits",
                    severity: Severity::Warning,
                    customer_id: None,
                    detail: format!(
                        "promotion {id} ({code}): counter {current_uses}, rows {actual}, max {max_uses:?}"
                    ),
                },
            )
            .collect())
    }

    /// Cancelled subscriptions must record when they were cancelled.
    async fn check_cancelled_has_cancelled_at(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT id, customer_id
            FROM subscriptions
            WHERE status = 'cancelled' AND cancelled_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, customer_id)| InvariantViolation {
                check: "cancelled_has_cancelled_at",
                severity: Severity::Warning,
                customer_id: Some(customer_id),
                detail: format!("subscription {id} cancelled without cancelled_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_critical_violations() {
        let report = InvariantReport {
            checks_run: 5,
            violations: vec![
                InvariantViolation {
                    check: "single_active_subscription",
                    severity: Severity::Critical,
                    customer_id: Some(Uuid::nil()),
                    detail: "2 concurrent active/past_due subscriptions".into(),
                },
                InvariantViolation {
                    check: "cancelled_has_cancelled_at",
                    severity: Severity::Warning,
                    customer_id: None,
                    detail: "missing cancelled_at".into(),
                },
            ],
        };

        assert!(!report.is_clean());
        assert_eq!(report.critical_count(), 1);
    }

    #[test]
    fn empty_report_is_clean() {
        let report = InvariantReport {
            checks_run: 5,
            violations: vec![],
        };
        assert!(report.is_clean());
        assert_eq!(report.critical_count(), 0);
    }
}
