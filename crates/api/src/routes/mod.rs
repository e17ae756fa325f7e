//! Route registration

mod admin;
mod payments;
mod plans;
mod subscriptions;
mod webhooks;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/plans", get(plans::list_plans))
        .route("/api/payments", post(payments::create_payment))
        .route("/api/payments/{id}", get(payments::get_payment))
        .route(
            "/api/subscriptions",
            get(subscriptions::current_subscription),
        )
        .route(
            "/api/subscriptions/switch-preview",
            get(subscriptions::switch_preview),
        )
        .route("/api/subscriptions/switch", post(subscriptions::switch_plan))
        .route(
            "/api/subscriptions/{id}/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route("/api/admin/payments", get(admin::list_payments))
        .route(
            "/api/admin/payments/{id}/approve",
            post(admin::approve_payment),
        )
        .route(
            "/api/admin/payments/{id}/reject",
            post(admin::reject_payment),
        )
        .route(
            "/api/admin/payments/{id}/refund",
            post(admin::refund_payment),
        )
        .route(
            "/api/admin/subscriptions/{id}/extend",
            post(admin::extend_subscription),
        )
        .route(
            "/api/admin/refund-requests",
            get(admin::list_refund_requests),
        )
        .route(
            "/api/admin/refund-requests/{id}/resolve",
            post(admin::resolve_refund_request),
        )
        .route("/api/admin/invariants", get(admin::run_invariants))
        .route("/api/webhooks/gateway", post(webhooks::gateway_webhook))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
