//! Customer subscription endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use streampass_billing::{
    plan_switch_quote, BillingError, CancelMode, CancellationOutcome, PlanSwitchOutcome,
    PlanSwitchQuote,
};
use streampass_billing::events::ActorType;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CurrentSubscriptionResponse {
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub tier: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub auto_renew: bool,
}

/// The caller's current entitlement, or 404 when they have none.
pub async fn current_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<CurrentSubscriptionResponse>> {
    let current = state
        .billing
        .subscriptions
        .current_entitlement(user.customer_id)
        .await?
        .ok_or_else(|| {
            ApiError::Billing(BillingError::NotFound("no active subscription".into()))
        })?;

    Ok(Json(CurrentSubscriptionResponse {
        subscription_id: current.subscription_id,
        plan_id: current.plan_id,
        plan_name: current.plan_name,
        tier: current.tier,
        status: current.status,
        start_date: current.start_date,
        end_date: current.end_date,
        auto_renew: current.auto_renew,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SwitchPreviewQuery {
    pub new_plan_id: Uuid,
}

/// Read-only proration breakdown for switching to `new_plan_id`.
pub async fn switch_preview(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SwitchPreviewQuery>,
) -> ApiResult<Json<PlanSwitchQuote>> {
    let new_price: Option<(i64,)> = sqlx::query_as(
        "SELECT price_vnd FROM subscription_plans WHERE id = $1 AND is_active = TRUE",
    )
    .bind(query.new_plan_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(BillingError::from)?;
    let Some((new_price,)) = new_price else {
        return Err(ApiError::Billing(BillingError::NotFound(format!(
            "plan {} not found",
            query.new_plan_id
        ))));
    };

    let current = state
        .billing
        .subscriptions
        .current_entitlement(user.customer_id)
        .await?
        .map(|c| (c.start_date, c.end_date, c.price_vnd));

    let quote = plan_switch_quote(current, new_price, OffsetDateTime::now_utc());
    Ok(Json(quote))
}

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub new_plan_id: Uuid,
}

/// Initiate a plan switch. Upgrades return a payable pending payment;
/// downgrades return the recorded refund request.
pub async fn switch_plan(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SwitchRequest>,
) -> ApiResult<Json<PlanSwitchOutcome>> {
    let outcome = state
        .billing
        .payments
        .create_plan_switch(user.customer_id, req.new_plan_id)
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub mode: CancelMode,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Cancel the caller's subscription, immediately or at period end.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<CancellationOutcome>> {
    // Ownership check before the lifecycle call so other customers get a
    // 404 rather than a state error.
    let owner: Option<(Uuid,)> =
        sqlx::query_as("SELECT customer_id FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .fetch_optional(&state.pool)
            .await
            .map_err(BillingError::from)?;
    match owner {
        Some((customer_id,)) if customer_id == user.customer_id || user.is_admin() => {}
        _ => {
            return Err(ApiError::Billing(BillingError::NotFound(format!(
                "subscription {subscription_id} not found"
            ))));
        }
    }

    let actor_type = if user.is_admin() {
        ActorType::Admin
    } else {
        ActorType::Customer
    };
    let reason = req.reason.as_deref().unwrap_or("requested by customer");

    let outcome = state
        .billing
        .subscriptions
        .cancel(
            subscription_id,
            req.mode,
            reason,
            user.customer_id,
            actor_type,
        )
        .await?;

    Ok(Json(outcome))
}
