use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::AuthUser;
use shared_models::error::AppError;
use shared_utils::authorization::{
    ensure_doctor_scope, require_permission, scoped_doctor_filter, Permission,
};
use shared_utils::extractor::{ApiJson, ClientInfo};
use shared_utils::state::AppState;

use crate::models::{
    AppointmentListQuery, CancelAppointmentRequest, CreateAppointmentRequest, DailyScheduleQuery,
    SchedulingRules, StatsQuery, UpdateAppointmentRequest,
};
use crate::services::schedule::clinic_today;
use crate::services::{AppointmentBookingService, AppointmentScheduleService};

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_permission(&user, Permission::AppointmentWrite)?;
    ensure_doctor_scope(&user, request.doctor_id)?;

    let rules = SchedulingRules::from_config(&state.config);
    let appointment = state
        .db
        .write(move |conn| {
            AppointmentBookingService::create_appointment(conn, request, &rules, &user, &client)
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Appointment created successfully",
            "appointment": appointment
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::AppointmentRead)?;

    let appointment = state
        .db
        .read(move |conn| AppointmentBookingService::get_appointment(conn, appointment_id))
        .await?;
    ensure_doctor_scope(&user, appointment.doctor_id)?;

    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(appointment_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::AppointmentWrite)?;
    if let Some(doctor_id) = request.doctor_id {
        ensure_doctor_scope(&user, doctor_id)?;
    }

    let rules = SchedulingRules::from_config(&state.config);
    let appointment = state
        .db
        .write(move |conn| {
            let current = AppointmentBookingService::get_appointment(conn, appointment_id)?;
            ensure_doctor_scope(&user, current.doctor_id)?;
            let updated = AppointmentBookingService::update_appointment(
                conn,
                appointment_id,
                request,
                &rules,
                &user,
                &client,
            )?;
            Ok::<_, AppError>(updated)
        })
        .await?;

    Ok(Json(json!({
        "message": "Appointment updated successfully",
        "appointment": appointment
    })))
}

/// Cancels rather than deletes; the optional body carries a reason.
#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(appointment_id): Path<Uuid>,
    body: Option<ApiJson<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::AppointmentWrite)?;
    let reason = body.and_then(|ApiJson(request)| request.reason);

    let appointment = state
        .db
        .write(move |conn| {
            let current = AppointmentBookingService::get_appointment(conn, appointment_id)?;
            ensure_doctor_scope(&user, current.doctor_id)?;
            let cancelled = AppointmentBookingService::cancel_appointment(
                conn,
                appointment_id,
                reason,
                &user,
                &client,
            )?;
            Ok::<_, AppError>(cancelled)
        })
        .await?;

    Ok(Json(json!({
        "message": "Appointment cancelled successfully",
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn mark_attended(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::AppointmentWrite)?;

    let appointment = state
        .db
        .write(move |conn| {
            let current = AppointmentBookingService::get_appointment(conn, appointment_id)?;
            ensure_doctor_scope(&user, current.doctor_id)?;
            let attended =
                AppointmentBookingService::mark_attended(conn, appointment_id, &user, &client)?;
            Ok::<_, AppError>(attended)
        })
        .await?;

    Ok(Json(json!({
        "message": "Appointment marked as attended",
        "appointment": appointment
    })))
}

// ==============================================================================
// SCHEDULE & REPORTING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(mut query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::AppointmentRead)?;
    query.doctor_id = scoped_doctor_filter(&user, query.doctor_id)?;

    let rules = SchedulingRules::from_config(&state.config);
    let page = state
        .db
        .read(move |conn| AppointmentScheduleService::list_appointments(conn, &query, &rules))
        .await?;

    Ok(Json(json!({
        "appointments": page.items,
        "pagination": page.pagination
    })))
}

#[axum::debug_handler]
pub async fn daily_schedule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DailyScheduleQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::ScheduleRead)?;
    ensure_doctor_scope(&user, doctor_id)?;

    let rules = SchedulingRules::from_config(&state.config);
    let date = query.date.unwrap_or_else(|| clinic_today(&rules));
    debug!("Fetching schedule for doctor {} on {}", doctor_id, date);

    let schedule = state
        .db
        .read(move |conn| AppointmentScheduleService::daily_schedule(conn, doctor_id, date, &rules))
        .await?;

    Ok(Json(json!(schedule)))
}

#[axum::debug_handler]
pub async fn appointment_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(mut query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::AppointmentRead)?;
    query.doctor_id = scoped_doctor_filter(&user, query.doctor_id)?;

    let rules = SchedulingRules::from_config(&state.config);
    let stats = state
        .db
        .read(move |conn| AppointmentScheduleService::stats(conn, &query, &rules))
        .await?;

    Ok(Json(json!({ "stats": stats })))
}
