//! Back-office endpoints
//!
//! All handlers require an admin token. Refund-request queue queries live
//! here rather than in the billing crate; they are plain list/update
//! operations with no billing logic attached.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use streampass_billing::events::ActorType;
use streampass_billing::{ApprovedPayment, BillingError, InvariantReport, PaymentView};

use crate::auth::AdminUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// Verification queue, defaulting to pending payments.
pub async fn list_payments(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListPaymentsQuery>,
) -> ApiResult<Json<Vec<PaymentView>>> {
    let status = query.status.as_deref().unwrap_or("pending");
    let payments = state.billing.payments.list_by_status(status).await?;
    Ok(Json(payments))
}

#[derive(Debug, Deserialize, Default)]
pub struct ApproveRequest {
    #[serde(default)]
    pub bank_transaction_ref: Option<String>,
}

pub async fn approve_payment(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(payment_id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<ApprovedPayment>> {
    let approved = state
        .billing
        .payments
        .approve(
            payment_id,
            Some(admin.admin_id),
            req.bank_transaction_ref.as_deref(),
            ActorType::Admin,
        )
        .await?;

    Ok(Json(approved))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub async fn reject_payment(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(payment_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("rejection reason is required".into()));
    }

    state
        .billing
        .payments
        .reject(payment_id, Some(admin.admin_id), &req.reason)
        .await?;

    Ok(Json(json!({ "payment_id": payment_id, "status": "cancelled" })))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .payments
        .mark_refunded(payment_id, admin.admin_id)
        .await?;

    Ok(Json(json!({ "payment_id": payment_id, "status": "refunded" })))
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub additional_months: i32,
}

pub async fn extend_subscription(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<ExtendRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let new_end = state
        .billing
        .subscriptions
        .extend(subscription_id, req.additional_months, admin.admin_id)
        .await?;

    Ok(Json(json!({
        "subscription_id": subscription_id,
        "new_end_date": new_end.to_string(),
    })))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RefundRequestView {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount_vnd: i64,
    pub reason: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Open refund requests, oldest first.
pub async fn list_refund_requests(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<RefundRequestView>>> {
    let requests = sqlx::query_as::<_, RefundRequestView>(
        r#"
        SELECT id, customer_id, subscription_id, amount_vnd, reason, status, created_at
        FROM refund_requests
        WHERE status = 'open'
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(&state.pool)
    .await
    .map_err(BillingError::from)?;

    Ok(Json(requests))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// `resolved` (refund completed) or `dismissed`.
    pub action: String,
}

pub async fn resolve_refund_request(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(request_id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.action != "resolved" && req.action != "dismissed" {
        return Err(ApiError::BadRequest(
            "action must be 'resolved' or 'dismissed'".into(),
        ));
    }

    let updated = sqlx::query(
        r#"
        UPDATE refund_requests
        SET status = $2, resolved_by = $3, resolved_at = NOW()
        WHERE id = $1 AND status = 'open'
        "#,
    )
    .bind(request_id)
    .bind(&req.action)
    .bind(admin.admin_id)
    .execute(&state.pool)
    .await
    .map_err(BillingError::from)?
    .rows_affected();

    if updated == 0 {
        return Err(ApiError::Billing(BillingError::NotFound(format!(
            "open refund request {request_id} not found"
        ))));
    }

    tracing::info!(
        refund_request_id = %request_id,
        admin_id = %admin.admin_id,
        action = %req.action,
        "Refund request resolved"
    );

    Ok(Json(json!({ "refund_request_id": request_id, "status": req.action })))
}

/// Run the read-only invariant audit and return the report.
pub async fn run_invariants(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<InvariantReport>> {
    let report = state.billing.invariants.run_all().await?;
    Ok(Json(report))
}
