use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use appointment_cell::appointment_routes;
use auth_cell::auth_routes;
use consultation_cell::{consultation_routes, prescription_routes};
use doctor_cell::router::doctor_routes;
use external_cell::external_routes;
use patient_cell::patient_routes;
use security_cell::audit_routes;
use shared_utils::state::AppState;

/// Every cell, mounted under `/api/v1` and the legacy `/api` prefix.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/api/v1", api_routes(state.clone()))
        .nest("/api", api_routes(state))
        .fallback(not_found)
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .nest("/auth", auth_routes(state.clone()))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/consultations", consultation_routes(state.clone()))
        .nest("/prescriptions", prescription_routes(state.clone()))
        .nest("/external", external_routes(state.clone()))
        .nest("/audit", audit_routes(state))
}

async fn health(State(state): State<AppState>) -> Response {
    let database = if state.db.ping().await { "connected" } else { "unavailable" };
    let status = if database == "connected" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.environment,
            "database": database
        })),
    )
        .into_response()
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Route {} not found", uri.path()) })),
    )
        .into_response()
}
