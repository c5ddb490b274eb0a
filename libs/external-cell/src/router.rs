use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;
use shared_utils::rate_limit::external_rate_limit;
use shared_utils::state::AppState;

use crate::handlers;

/// Billing integration routes. Everything is admin-only except the webhook,
/// which carries its own HMAC signature.
pub fn external_routes(state: AppState) -> Router {
    let webhook_routes = Router::new().route("/webhook/billing", post(handlers::billing_webhook));

    let protected_routes = Router::new()
        .route("/sync/appointment", post(handlers::sync_appointment))
        .route("/payment/status", put(handlers::update_payment_status))
        .route("/sync/status/{external_code}", get(handlers::sync_status))
        .route("/sync/stats", get(handlers::sync_stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(webhook_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(state.clone(), external_rate_limit))
        .with_state(state)
}
