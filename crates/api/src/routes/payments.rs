//! Customer payment endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use streampass_billing::{CreatedPayment, PaymentView};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub plan_id: Uuid,
    pub payment_method: String,
    pub coupon_code: Option<String>,
}

/// Create a pending payment for a plan. Returns the transfer code and
/// expiry the customer needs to complete the purchase.
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<Json<CreatedPayment>> {
    if req.payment_method != "bank_transfer" {
        return Err(ApiError::BadRequest(
            "only bank_transfer payments are supported".into(),
        ));
    }

    let created = state
        .billing
        .payments
        .create_plan_purchase(user.customer_id, req.plan_id, req.coupon_code.as_deref())
        .await?;

    Ok(Json(created))
}

/// Poll-safe payment status. Customers only see their own payments;
/// admins see any.
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<PaymentView>> {
    let payment = state.billing.payments.get(payment_id).await?;

    if payment.customer_id != user.customer_id && !user.is_admin() {
        // Hide existence from other customers.
        return Err(ApiError::Billing(
            streampass_billing::BillingError::NotFound(format!("payment {payment_id} not found")),
        ));
    }

    Ok(Json(payment))
}
