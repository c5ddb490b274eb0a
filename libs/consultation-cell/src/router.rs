use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn consultation_routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::record_consultation))
        .route("/appointment/{appointment_id}", get(handlers::get_by_appointment))
        .route("/{consultation_id}", put(handlers::update_consultation))
        .route(
            "/{consultation_id}/prescriptions",
            get(handlers::list_prescriptions).post(handlers::add_prescription),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

pub fn prescription_routes(state: AppState) -> Router {
    Router::new()
        .route("/{prescription_id}/status", put(handlers::update_prescription_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
