//! API error responses
//!
//! Maps `BillingError` variants onto HTTP statuses. User-facing messages
//! pass through; internal details are logged and replaced with a generic
//! body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use streampass_billing::BillingError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Billing(e) => {
                let status = match e {
                    BillingError::Validation(_) => StatusCode::BAD_REQUEST,
                    BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                    BillingError::Conflict(_)
                    | BillingError::AlreadyProcessed(_)
                    | BillingError::CodeAllocationExhausted { .. } => StatusCode::CONFLICT,
                    BillingError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    BillingError::WebhookSignatureInvalid => StatusCode::UNAUTHORIZED,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if e.is_user_facing() {
                    (status, e.to_string())
                } else {
                    tracing::error!(error = %e, "Internal billing error");
                    (status, "internal error".to_string())
                }
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
