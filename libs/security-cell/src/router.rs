use axum::{middleware, routing::get, Router};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn audit_routes(state: AppState) -> Router {
    Router::new()
        .route("/entity/{entity_type}/{entity_id}", get(handlers::get_entity_history))
        .route("/user/{user_id}", get(handlers::get_user_activity))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
