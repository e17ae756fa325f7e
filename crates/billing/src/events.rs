//! Billing event log
//!
//! Append-only audit trail for every billing mutation. Logging failures
//! are warned and never propagated: the audit trail must not be able to
//! fail a customer's payment.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEventType {
    PaymentCreated,
    PaymentApproved,
    PaymentRejected,
    PaymentRefunded,
    SubscriptionCreated,
    SubscriptionExtended,
    SubscriptionCancelled,
    SubscriptionExpired,
    TierChanged,
    RefundRequested,
    PromotionRedeemed,
    ReconciliationRepair,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::PaymentCreated => "payment_created",
            BillingEventType::PaymentApproved => "payment_approved",
            BillingEventType::PaymentRejected => "payment_rejected",
            BillingEventType::PaymentRefunded => "payment_refunded",
            BillingEventType::SubscriptionCreated => "subscription_created",
            BillingEventType::SubscriptionExtended => "subscription_extended",
            BillingEventType::SubscriptionCancelled => "subscription_cancelled",
            BillingEventType::SubscriptionExpired => "subscription_expired",
            BillingEventType::TierChanged => "tier_changed",
            BillingEventType::RefundRequested => "refund_requested",
            BillingEventType::PromotionRedeemed => "promotion_redeemed",
            BillingEventType::ReconciliationRepair => "reconciliation_repair",
        }
    }
}

/// Who caused a billing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Customer,
    Admin,
    Gateway,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Customer => "customer",
            ActorType::Admin => "admin",
            ActorType::Gateway => "gateway",
            ActorType::System => "system",
        }
    }
}

/// Builder for one audit event.
pub struct BillingEventBuilder {
    customer_id: Uuid,
    event_type: BillingEventType,
    actor_type: ActorType,
    actor_id: Option<Uuid>,
    data: Value,
}

impl BillingEventBuilder {
    pub fn new(customer_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            customer_id,
            event_type,
            actor_type: ActorType::System,
            actor_id: None,
            data: Value::Object(Default::default()),
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn actor(mut self, actor_id: Uuid, actor_type: ActorType) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_type = actor_type;
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }
}

#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log_event(&self, event: BillingEventBuilder) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_events (customer_id, event_type, actor_type, actor_id, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.customer_id)
        .bind(event.event_type.as_str())
        .bind(event.actor_type.as_str())
        .bind(event.actor_id)
        .bind(&event.data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Log and swallow: audit failures are warned, never fatal.
    pub async fn log_best_effort(&self, event: BillingEventBuilder) {
        let event_type = event.event_type;
        if let Err(e) = self.log_event(event).await {
            tracing::warn!(
                event_type = event_type.as_str(),
                error = %e,
                "Failed to write billing event"
            );
        }
    }
}
