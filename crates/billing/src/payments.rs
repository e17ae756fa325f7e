//! Payment ledger
//!
//! Manual bank-transfer payments move through a strict state machine:
//! pending -> succeeded | failed | cancelled, succeeded -> refunded.
//! Every transition is a conditional UPDATE keyed on the expected current
//! status; zero rows affected means another actor won the race and the
//! caller gets `AlreadyProcessed` instead of a silent double-apply.
//!
//! A pending payment past `expires_at` is *displayed* expired and refuses
//! approval, but no job rewrites its row. The row stays pending so a late
//! bank transfer can still be matched by hand.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::codes::PaymentCodeAllocator;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::promotions::{PromotionOutcome, PromotionValidator};
use crate::proration;
use crate::subscriptions::SubscriptionLifecycleManager;
use streampass_shared::Tier;

/// Window a customer has to complete the bank transfer.
pub const PAYMENT_VALIDITY_HOURS: i64 = 24;

/// What a payment buys, snapshotted at creation time so later catalog
/// edits cannot change what an approval materializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseIntent {
    PlanPurchase {
        plan_id: Uuid,
        tier: String,
        duration_months: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        coupon_code: Option<String>,
    },
    PlanUpgrade {
        old_plan_id: Uuid,
        new_plan_id: Uuid,
        tier: String,
        duration_months: i32,
        /// Prorated credit from the old plan, frozen into the quote.
        remaining_value_vnd: i64,
    },
}

impl PurchaseIntent {
    pub fn plan_id(&self) -> Uuid {
        match self {
            PurchaseIntent::PlanPurchase { plan_id, .. } => *plan_id,
            PurchaseIntent::PlanUpgrade { new_plan_id, .. } => *new_plan_id,
        }
    }

    pub fn tier(&self) -> &str {
        match self {
            PurchaseIntent::PlanPurchase { tier, .. } => tier,
            PurchaseIntent::PlanUpgrade { tier, .. } => tier,
        }
    }

    pub fn duration_months(&self) -> i32 {
        match self {
            PurchaseIntent::PlanPurchase {
                duration_months, ..
            } => *duration_months,
            PurchaseIntent::PlanUpgrade {
                duration_months, ..
            } => *duration_months,
        }
    }
}

/// A freshly created pending payment, with the instructions the customer
/// needs to complete the transfer.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPayment {
    pub payment_id: Uuid,
    pub payment_code: String,
    pub amount_vnd: i64,
    pub original_amount_vnd: i64,
    pub discount_amount_vnd: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Result of asking to switch plans: upgrades produce a payable payment,
/// downgrades produce a manual refund request and change nothing else.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanSwitchOutcome {
    UpgradePayment {
        #[serde(flatten)]
        payment: CreatedPayment,
        remaining_value_vnd: i64,
    },
    DowngradeRefund {
        refund_request_id: Uuid,
        refund_amount_vnd: i64,
    },
}

/// Payment row as surfaced to callers. `is_expired` is computed at read
/// time from `expires_at`, never stored.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentView {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub amount_vnd: i64,
    pub original_amount_vnd: i64,
    pub discount_amount_vnd: i64,
    pub status: String,
    pub payment_method: String,
    pub payment_code: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    pub rejection_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[sqlx(skip)]
    pub is_expired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovedPayment {
    pub payment_id: Uuid,
    pub customer_id: Uuid,
    pub subscription_id: Uuid,
    pub tier: String,
    #[serde(with = "time::serde::rfc3339")]
    pub subscription_end_date: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    customer_id: Uuid,
    status: String,
    promotion_id: Option<Uuid>,
    expires_at: OffsetDateTime,
    intent: serde_json::Value,
}

pub struct PaymentLedger {
    pool: PgPool,
    codes: PaymentCodeAllocator,
    promotions: PromotionValidator,
    subscriptions: SubscriptionLifecycleManager,
    email: BillingEmailService,
    event_logger: BillingEventLogger,
}

impl PaymentLedger {
    pub fn new(pool: PgPool, email: BillingEmailService) -> Self {
        Self {
            codes: PaymentCodeAllocator::new(pool.clone()),
            promotions: PromotionValidator::new(pool.clone()),
            subscriptions: SubscriptionLifecycleManager::new(pool.clone(), email.clone()),
            event_logger: BillingEventLogger::new(pool.clone()),
            pool,
            email,
        }
    }

    /// Create a pending payment for a plan purchase.
    ///
    /// The coupon, if given, must validate here or the whole creation
    /// fails with the coupon's user-facing message. Validation does not
    /// burn the redemption; that happens at approval.
    pub async fn create_plan_purchase(
        &self,
        customer_id: Uuid,
        plan_id: Uuid,
        coupon_code: Option<&str>,
    ) -> BillingResult<CreatedPayment> {
        let customer: Option<(String,)> =
            sqlx::query_as("SELECT email FROM customers WHERE id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((customer_email,)) = customer else {
            return Err(BillingError::NotFound(format!(
                "customer {customer_id} not found"
            )));
        };

        let plan: Option<(String, i32, i64, bool)> = sqlx::query_as(
            "SELECT tier, duration_months, price_vnd, is_active FROM subscription_plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((tier, duration_months, price_vnd, is_active)) = plan else {
            return Err(BillingError::NotFound(format!("plan {plan_id} not found")));
        };
        if !is_active {
            return Err(BillingError::Validation(
                "plan is no longer available for purchase".into(),
            ));
        }

        let (amount_vnd, discount_vnd, promotion_id) = match coupon_code {
            Some(code) => match self.promotions.validate(code, price_vnd, customer_id).await? {
                PromotionOutcome::Valid(quote) => (
                    quote.final_amount_vnd,
                    quote.discount_amount_vnd,
                    Some(quote.promotion_id),
                ),
                PromotionOutcome::Invalid { error } => {
                    return Err(BillingError::Validation(error.user_message().to_string()));
                }
            },
            None => (price_vnd, 0, None),
        };

        let intent = PurchaseIntent::PlanPurchase {
            plan_id,
            tier: tier.clone(),
            duration_months,
            coupon_code: coupon_code.map(str::to_string),
        };

        let created = self
            .insert_pending(
                customer_id,
                amount_vnd,
                price_vnd,
                discount_vnd,
                promotion_id,
                &intent,
            )
            .await?;

        self.email
            .send_payment_instructions(
                &customer_email,
                &created.payment_code,
                created.amount_vnd,
                PAYMENT_VALIDITY_HOURS,
            )
            .await;

        self.event_logger
            .log_best_effort(
                BillingEventBuilder::new(customer_id, BillingEventType::PaymentCreated)
                    .data(serde_json::json!({
                        "payment_id": created.payment_id,
                        "plan_id": plan_id,
                        "amount_vnd": created.amount_vnd,
                        "coupon_code": coupon_code,
                    }))
                    .actor(customer_id, ActorType::Customer),
            )
            .await;

        Ok(created)
    }

    /// Quote and initiate a plan switch.
    ///
    /// Upgrades (positive amount after prorated credit) create a pending
    /// payment; the current subscription stays active until that payment
    /// is approved. Downgrades open a refund request and leave the
    /// entitlement untouched until an operator completes the refund.
    pub async fn create_plan_switch(
        &self,
        customer_id: Uuid,
        new_plan_id: Uuid,
    ) -> BillingResult<PlanSwitchOutcome> {
        let Some(current) = self.subscriptions.current_entitlement(customer_id).await? else {
            return Err(BillingError::InvalidState(
                "no active subscription to switch from; purchase the plan directly".into(),
            ));
        };
        if current.plan_id == new_plan_id {
            return Err(BillingError::Validation(
                "already subscribed to this plan".into(),
            ));
        }

        let new_plan: Option<(String, i32, i64, bool)> = sqlx::query_as(
            "SELECT tier, duration_months, price_vnd, is_active FROM subscription_plans WHERE id = $1",
        )
        .bind(new_plan_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((new_tier, duration_months, new_price, is_active)) = new_plan else {
            return Err(BillingError::NotFound(format!(
                "plan {new_plan_id} not found"
            )));
        };
        if !is_active {
            return Err(BillingError::Validation(
                "plan is no longer available for purchase".into(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let quote = proration::plan_switch_quote(
            Some((current.start_date, current.end_date, current.price_vnd)),
            new_price,
            now,
        );

        if !quote.is_upgrade {
            let refund = quote.amount_to_pay_vnd.unsigned_abs() as i64;
            let request_id = self
                .subscriptions
                .record_downgrade_request(
                    customer_id,
                    current.subscription_id,
                    current.plan_id,
                    new_plan_id,
                    refund,
                )
                .await?;
            return Ok(PlanSwitchOutcome::DowngradeRefund {
                refund_request_id: request_id,
                refund_amount_vnd: refund,
            });
        }

        let intent = PurchaseIntent::PlanUpgrade {
            old_plan_id: current.plan_id,
            new_plan_id,
            tier: new_tier,
            duration_months,
            remaining_value_vnd: quote.remaining_value_vnd,
        };

        let created = self
            .insert_pending(
                customer_id,
                quote.amount_to_pay_vnd,
                new_price,
                quote.remaining_value_vnd,
                None,
                &intent,
            )
            .await?;

        if let Ok(Some((email,))) =
            sqlx::query_as::<_, (String,)>("SELECT email FROM customers WHERE id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await
        {
            self.email
                .send_payment_instructions(
                    &email,
                    &created.payment_code,
                    created.amount_vnd,
                    PAYMENT_VALIDITY_HOURS,
                )
                .await;
        }

        self.event_logger
            .log_best_effort(
                BillingEventBuilder::new(customer_id, BillingEventType::PaymentCreated)
                    .data(serde_json::json!({
                        "payment_id": created.payment_id,
                        "new_plan_id": new_plan_id,
                        "amount_vnd": created.amount_vnd,
                        "remaining_value_vnd": quote.remaining_value_vnd,
                    }))
                    .actor(customer_id, ActorType::Customer),
            )
            .await;

        Ok(PlanSwitchOutcome::UpgradePayment {
            payment: created,
            remaining_value_vnd: quote.remaining_value_vnd,
        })
    }

    async fn insert_pending(
        &self,
        customer_id: Uuid,
        amount_vnd: i64,
        original_amount_vnd: i64,
        discount_amount_vnd: i64,
        promotion_id: Option<Uuid>,
        intent: &PurchaseIntent,
    ) -> BillingResult<CreatedPayment> {
        let payment_code = self.codes.allocate().await?;
        let expires_at = OffsetDateTime::now_utc() + Duration::hours(PAYMENT_VALIDITY_HOURS);
        let intent_json = serde_json::to_value(intent)
            .map_err(|e| BillingError::Validation(format!("intent serialization: {e}")))?;

        let (payment_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO payments
                (customer_id, amount_vnd, original_amount_vnd, discount_amount_vnd,
                 promotion_id, payment_method, payment_code, expires_at, intent)
            VALUES ($1, $2, $3, $4, $5, 'bank_transfer', $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(customer_id)
        .bind(amount_vnd)
        .bind(original_amount_vnd)
        .bind(discount_amount_vnd)
        .bind(promotion_id)
        .bind(&payment_code)
        .bind(expires_at)
        .bind(&intent_json)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            payment_id = %payment_id,
            customer_id = %customer_id,
            amount_vnd = amount_vnd,
            payment_code = %payment_code,
            "Pending payment created"
        );

        Ok(CreatedPayment {
            payment_id,
            payment_code,
            amount_vnd,
            original_amount_vnd,
            discount_amount_vnd,
            expires_at,
        })
    }

    /// Approve a pending payment and materialize what it bought.
    ///
    /// Phase 1 (one transaction): claim pending -> succeeded and record
    /// the coupon redemption. Phase 2: materialize the entitlement. If
    /// phase 2 fails the payment stays succeeded and the hourly
    /// reconciliation sweep repairs the gap; the caller sees a
    /// `Reconciliation` error rather than a rolled-back approval.
    pub async fn approve(
        &self,
        payment_id: Uuid,
        verified_by: Option<Uuid>,
        bank_transaction_ref: Option<&str>,
        actor_type: ActorType,
    ) -> BillingResult<ApprovedPayment> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            SELECT customer_id, status, promotion_id, expires_at, intent
            FROM payments
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(payment) = row else {
            return Err(BillingError::NotFound(format!(
                "payment {payment_id} not found"
            )));
        };

        if payment.status != "pending" {
            return Err(BillingError::AlreadyProcessed(format!(
                "payment is already {}",
                payment.status
            )));
        }
        if payment.expires_at < now {
            return Err(BillingError::InvalidState(
                "payment window has expired; create a new payment".into(),
            ));
        }

        let intent: PurchaseIntent = serde_json::from_value(payment.intent.clone())
            .map_err(|e| BillingError::InvalidState(format!("unreadable payment intent: {e}")))?;
        let tier: Tier = intent
            .tier()
            .parse()
            .map_err(|e| BillingError::InvalidState(format!("payment intent tier: {e}")))?;

        let claimed = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'succeeded',
                verified_by = $2,
                verified_at = $3,
                paid_at = $3,
                bank_transaction_ref = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_id)
        .bind(verified_by)
        .bind(now)
        .bind(bank_transaction_ref)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            return Err(BillingError::AlreadyProcessed(
                "payment was approved or rejected concurrently".into(),
            ));
        }

        if let Some(promotion_id) = payment.promotion_id {
            // A conflicting redemption rolls the whole approval back.
            PromotionValidator::record_redemption(
                &mut tx,
                promotion_id,
                payment.customer_id,
                payment_id,
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            payment_id = %payment_id,
            customer_id = %payment.customer_id,
            actor_type = actor_type.as_str(),
            "Payment approved"
        );

        self.event_logger
            .log_best_effort({
                let builder =
                    BillingEventBuilder::new(payment.customer_id, BillingEventType::PaymentApproved)
                        .data(serde_json::json!({
                            "payment_id": payment_id,
                            "bank_transaction_ref": bank_transaction_ref,
                        }));
                match verified_by {
                    Some(admin) => builder.actor(admin, actor_type),
                    None => builder.actor_type(actor_type),
                }
            })
            .await;

        if let Some(promotion_id) = payment.promotion_id {
            self.event_logger
                .log_best_effort(
                    BillingEventBuilder::new(
                        payment.customer_id,
                        BillingEventType::PromotionRedeemed,
                    )
                    .data(serde_json::json!({
                        "payment_id": payment_id,
                        "promotion_id": promotion_id,
                    }))
                    .actor_type(actor_type),
                )
                .await;
        }

        // Phase 2. A failure here leaves a succeeded payment without its
        // entitlement; the reconciliation sweep owns the retry.
        let subscription_id = match self
            .subscriptions
            .materialize(
                payment.customer_id,
                intent.plan_id(),
                tier,
                intent.duration_months(),
                actor_type,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    payment_id = %payment_id,
                    customer_id = %payment.customer_id,
                    error = %e,
                    "Payment approved but entitlement materialization failed"
                );
                return Err(BillingError::Reconciliation(format!(
                    "payment {payment_id} approved but entitlement not yet granted: {e}"
                )));
            }
        };

        let end_date: OffsetDateTime =
            sqlx::query_scalar("SELECT end_date FROM subscriptions WHERE id = $1")
                .bind(subscription_id)
                .fetch_one(&self.pool)
                .await?;

        if let Ok(Some((email,))) =
            sqlx::query_as::<_, (String,)>("SELECT email FROM customers WHERE id = $1")
                .bind(payment.customer_id)
                .fetch_optional(&self.pool)
                .await
        {
            self.email
                .send_payment_approved(&email, tier.as_str(), &end_date.to_string())
                .await;
        }

        Ok(ApprovedPayment {
            payment_id,
            customer_id: payment.customer_id,
            subscription_id,
            tier: tier.as_str().to_string(),
            subscription_end_date: end_date,
        })
    }

    /// Reject a pending payment. Terminal; the customer must create a new
    /// payment to try again. `verified_by` is the rejecting admin, or
    /// `None` for a gateway-sourced rejection.
    pub async fn reject(
        &self,
        payment_id: Uuid,
        verified_by: Option<Uuid>,
        reason: &str,
    ) -> BillingResult<()> {
        let rejected = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'cancelled',
                verified_by = $2,
                verified_at = NOW(),
                rejection_reason = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_id)
        .bind(verified_by)
        .bind(reason)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rejected == 0 {
            let status: Option<(String,)> =
                sqlx::query_as("SELECT status FROM payments WHERE id = $1")
                    .bind(payment_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match status {
                None => Err(BillingError::NotFound(format!(
                    "payment {payment_id} not found"
                ))),
                Some((s,)) => Err(BillingError::AlreadyProcessed(format!(
                    "payment is already {s}"
                ))),
            };
        }

        let customer: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT c.id, c.email
            FROM payments p JOIN customers c ON c.id = p.customer_id
            WHERE p.id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        tracing::info!(
            payment_id = %payment_id,
            verified_by = ?verified_by,
            reason = %reason,
            "Payment rejected"
        );

        if let Some((customer_id, email)) = customer {
            self.email.send_payment_rejected(&email, reason).await;
            self.event_logger
                .log_best_effort({
                    let builder =
                        BillingEventBuilder::new(customer_id, BillingEventType::PaymentRejected)
                            .data(serde_json::json!({
                                "payment_id": payment_id,
                                "reason": reason,
                            }));
                    match verified_by {
                        Some(admin) => builder.actor(admin, ActorType::Admin),
                        None => builder.actor_type(ActorType::Gateway),
                    }
                })
                .await;
        }

        Ok(())
    }

    /// Record that a succeeded payment was refunded out of band. Only a
    /// bookkeeping transition; money moved by hand.
    pub async fn mark_refunded(&self, payment_id: Uuid, admin_id: Uuid) -> BillingResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'refunded', updated_at = NOW()
            WHERE id = $1 AND status = 'succeeded'
            "#,
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            let status: Option<(String,)> =
                sqlx::query_as("SELECT status FROM payments WHERE id = $1")
                    .bind(payment_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match status {
                None => Err(BillingError::NotFound(format!(
                    "payment {payment_id} not found"
                ))),
                Some((s,)) => Err(BillingError::InvalidState(format!(
                    "only succeeded payments can be refunded, payment is {s}"
                ))),
            };
        }

        let customer_id: Uuid =
            sqlx::query_scalar("SELECT customer_id FROM payments WHERE id = $1")
                .bind(payment_id)
                .fetch_one(&self.pool)
                .await?;

        self.event_logger
            .log_best_effort(
                BillingEventBuilder::new(customer_id, BillingEventType::PaymentRefunded)
                    .data(serde_json::json!({ "payment_id": payment_id }))
                    .actor(admin_id, ActorType::Admin),
            )
            .await;

        Ok(())
    }

    pub async fn get(&self, payment_id: Uuid) -> BillingResult<PaymentView> {
        let view = sqlx::query_as::<_, PaymentView>(
            r#"
            SELECT id, customer_id, amount_vnd, original_amount_vnd, discount_amount_vnd,
                   status, payment_method, payment_code, expires_at, paid_at,
                   rejection_reason, created_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        match view {
            Some(v) => Ok(with_expiry(v)),
            None => Err(BillingError::NotFound(format!(
                "payment {payment_id} not found"
            ))),
        }
    }

    /// Admin verification queue, oldest first. `status` defaults to
    /// pending and must be a known payment status.
    pub async fn list_by_status(&self, status: &str) -> BillingResult<Vec<PaymentView>> {
        status
            .parse::<streampass_shared::PaymentStatus>()
            .map_err(|e| BillingError::Validation(e.to_string()))?;

        let rows = sqlx::query_as::<_, PaymentView>(
            r#"
            SELECT id, customer_id, amount_vnd, original_amount_vnd, discount_amount_vnd,
                   status, payment_method, payment_code, expires_at, paid_at,
                   rejection_reason, created_at
            FROM payments
            WHERE status = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(with_expiry).collect())
    }
}

fn with_expiry(mut view: PaymentView) -> PaymentView {
    view.is_expired = view.status == "pending" && view.expires_at < OffsetDateTime::now_utc();
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_intent_round_trips_with_kind_tag() {
        let intent = PurchaseIntent::PlanPurchase {
            plan_id: Uuid::nil(),
            tier: "pro".into(),
            duration_months: 3,
            coupon_code: Some("WELCOME20".into()),
        };
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["kind"], "plan_purchase");

        let back: PurchaseIntent = serde_json::from_value(json).unwrap();
        assert_eq!(back.tier(), "pro");
        assert_eq!(back.duration_months(), 3);
    }

    #[test]
    fn upgrade_intent_carries_frozen_credit() {
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let intent = PurchaseIntent::PlanUpgrade {
            old_plan_id: old,
            new_plan_id: new,
            tier: "max".into(),
            duration_months: 1,
            remaining_value_vnd: 200_000,
        };
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["kind"], "plan_upgrade");
        assert_eq!(json["remaining_value_vnd"], 200_000);
        assert_eq!(intent.plan_id(), new);
    }

    #[test]
    fn unknown_intent_kind_is_rejected() {
        let json = serde_json::json!({"kind": "gift_card", "value": 5});
        assert!(serde_json::from_value::<PurchaseIntent>(json).is_err());
    }

    #[test]
    fn omitted_coupon_is_absent_from_json() {
        let intent = PurchaseIntent::PlanPurchase {
            plan_id: Uuid::nil(),
            tier: "basic".into(),
            duration_months: 1,
            coupon_code: None,
        };
        let json = serde_json::to_value(&intent).unwrap();
        assert!(json.get("coupon_code").is_none());
    }

    #[test]
    fn expiry_is_computed_only_for_pending() {
        let past = OffsetDateTime::now_utc() - Duration::hours(1);
        let base = PaymentView {
            id: Uuid::nil(),
            customer_id: Uuid::nil(),
            amount_vnd: 100_000,
            original_amount_vnd: 100_000,
            discount_amount_vnd: 0,
            status: "pending".into(),
            payment_method: "bank_transfer".into(),
            payment_code: Some("SP-TESTCODE".into()),
            expires_at: past,
            paid_at: None,
            rejection_reason: None,
            created_at: past,
            is_expired: false,
        };

        assert!(with_expiry(base.clone()).is_expired);

        let mut succeeded = base;
        succeeded.status = "succeeded".into();
        assert!(!with_expiry(succeeded).is_expired);
    }
}
