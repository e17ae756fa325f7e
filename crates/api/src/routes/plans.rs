//! Plan catalog

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PlanResponse {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    pub duration_months: i32,
    pub price_vnd: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Public catalog: active plans in display order.
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<PlanResponse>>> {
    let plans = sqlx::query_as::<_, PlanResponse>(
        r#"
        SELECT id, name, tier, duration_months, price_vnd, created_at
        FROM subscription_plans
        WHERE is_active = TRUE
        ORDER BY display_order ASC, price_vnd ASC
        "#,
    )
    .fetch_all(&state.pool)
    .await
    .map_err(streampass_billing::BillingError::from)?;

    Ok(Json(plans))
}
