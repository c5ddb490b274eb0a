use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use appointment_cell::SchedulingRules;
use shared_models::auth::AuthUser;
use shared_models::error::AppError;
use shared_utils::authorization::{require_permission, Permission};
use shared_utils::extractor::{ApiJson, ClientInfo};
use shared_utils::state::AppState;

use crate::models::{
    PaymentStatusRequest, SyncAction, SyncAppointmentRequest, SyncStatsQuery, WebhookEvent,
};
use crate::services::{verify_signature, BillingSyncService, WebhookService};

pub const SIGNATURE_HEADER: &str = "x-signature";

// ==============================================================================
// SYNC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn sync_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<SyncAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_permission(&user, Permission::Administration)?;
    debug!("Billing sync requested by {}", user.id);

    let rules = SchedulingRules::from_config(&state.config);
    let outcome = state
        .db
        .write(move |conn| BillingSyncService::sync_appointment(conn, request, &rules, &client))
        .await?;

    let (status, message) = match outcome.action {
        SyncAction::Created => (StatusCode::CREATED, "Appointment synced from billing system"),
        SyncAction::Updated => (StatusCode::OK, "Appointment updated from billing system"),
        SyncAction::NoChange => (StatusCode::OK, "Appointment already in sync"),
    };
    Ok((
        status,
        Json(json!({
            "message": message,
            "action": outcome.action,
            "appointment_id": outcome.appointment_id,
            "patient_id": outcome.patient_id,
            "patient_created": outcome.patient_created
        })),
    ))
}

#[axum::debug_handler]
pub async fn update_payment_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<PaymentStatusRequest>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::Administration)?;

    let appointment = state
        .db
        .write(move |conn| BillingSyncService::update_payment_status(conn, request, &client))
        .await?;

    Ok(Json(json!({
        "message": "Payment status updated",
        "appointment_id": appointment.id,
        "new_status": appointment.status,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn sync_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(external_code): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::Administration)?;

    let status = state
        .db
        .read(move |conn| BillingSyncService::sync_status(conn, &external_code))
        .await?;

    Ok(Json(json!({ "appointment": status })))
}

#[axum::debug_handler]
pub async fn sync_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SyncStatsQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::Administration)?;

    let rules = SchedulingRules::from_config(&state.config);
    let stats = state
        .db
        .read(move |conn| BillingSyncService::sync_stats(conn, &query, &rules))
        .await?;

    Ok(Json(json!({ "statistics": stats })))
}

// ==============================================================================
// WEBHOOK
// ==============================================================================

/// Signed billing events. Authenticated by `X-Signature`, not by JWT.
#[axum::debug_handler]
pub async fn billing_webhook(
    State(state): State<AppState>,
    client: ClientInfo,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Billing webhook without signature");
            AppError::Auth("Missing webhook signature".to_string())
        })?;
    verify_signature(&state.config.billing_webhook_secret, &body, signature)?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;
    let event_type = event.event_type.clone();

    let rules = SchedulingRules::from_config(&state.config);
    let result = state
        .db
        .write(move |conn| WebhookService::handle_event(conn, event, &rules, &client))
        .await?;

    Ok(Json(json!({
        "received": true,
        "event_type": event_type,
        "result": result
    })))
}
