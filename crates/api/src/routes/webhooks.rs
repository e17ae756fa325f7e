//! Gateway webhook endpoint
//!
//! Unauthenticated: the HMAC signature in `X-Gateway-Signature` is the
//! only credential, and verification runs before anything touches the
//! database.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("X-Gateway-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;
    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
