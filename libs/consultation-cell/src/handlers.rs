use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use appointment_cell::AppointmentBookingService;
use shared_models::auth::AuthUser;
use shared_models::error::AppError;
use shared_utils::authorization::{ensure_doctor_scope, require_permission, Permission};
use shared_utils::extractor::{ApiJson, ClientInfo};
use shared_utils::state::AppState;

use crate::models::{
    ConsultationError, ConsultationFields, ConsultationView, CreatePrescriptionRequest,
    PrescriptionView, RecordConsultationRequest, UpdatePrescriptionStatusRequest,
};
use crate::services::{ConsultationService, PrescriptionService};

// ==============================================================================
// CONSULTATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn record_consultation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<RecordConsultationRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_permission(&user, Permission::ClinicalRecords)?;

    let consultation = state
        .db
        .write(move |conn| {
            let appointment = AppointmentBookingService::get_appointment(conn, request.appointment_id)?;
            ensure_doctor_scope(&user, appointment.doctor_id)?;
            let consultation = ConsultationService::record_consultation(conn, request, &user, &client)?;
            Ok::<_, AppError>(consultation)
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Consultation recorded successfully",
            "consultation": ConsultationView::from(consultation)
        })),
    ))
}

/// Consultation for an appointment together with its prescriptions.
#[axum::debug_handler]
pub async fn get_by_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::ClinicalRecords)?;

    let (consultation, prescriptions) = state
        .db
        .read(move |conn| {
            let appointment = AppointmentBookingService::get_appointment(conn, appointment_id)?;
            ensure_doctor_scope(&user, appointment.doctor_id)?;
            let consultation = ConsultationService::find_by_appointment(conn, appointment_id)?
                .ok_or(ConsultationError::NotFound)?;
            let prescriptions = PrescriptionService::list_for_consultation(conn, consultation.id)?;
            Ok::<_, AppError>((consultation, prescriptions))
        })
        .await?;

    let prescriptions: Vec<PrescriptionView> =
        prescriptions.into_iter().map(PrescriptionView::from).collect();
    Ok(Json(json!({
        "consultation": ConsultationView::from(consultation),
        "prescriptions": prescriptions
    })))
}

#[axum::debug_handler]
pub async fn update_consultation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(consultation_id): Path<Uuid>,
    ApiJson(fields): ApiJson<ConsultationFields>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::ClinicalRecords)?;

    let consultation = state
        .db
        .write(move |conn| {
            ensure_doctor_scope(&user, ConsultationService::owning_doctor(conn, consultation_id)?)?;
            let updated =
                ConsultationService::update_consultation(conn, consultation_id, fields, &user, &client)?;
            Ok::<_, AppError>(updated)
        })
        .await?;

    Ok(Json(json!({
        "message": "Consultation updated successfully",
        "consultation": ConsultationView::from(consultation)
    })))
}

// ==============================================================================
// PRESCRIPTION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn add_prescription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(consultation_id): Path<Uuid>,
    ApiJson(request): ApiJson<CreatePrescriptionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_permission(&user, Permission::ClinicalRecords)?;

    let prescription = state
        .db
        .write(move |conn| {
            ensure_doctor_scope(&user, ConsultationService::owning_doctor(conn, consultation_id)?)?;
            let prescription =
                PrescriptionService::add_prescription(conn, consultation_id, request, &user, &client)?;
            Ok::<_, AppError>(prescription)
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Prescription added successfully",
            "prescription": PrescriptionView::from(prescription)
        })),
    ))
}

#[axum::debug_handler]
pub async fn list_prescriptions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::ClinicalRecords)?;

    let prescriptions = state
        .db
        .read(move |conn| {
            ensure_doctor_scope(&user, ConsultationService::owning_doctor(conn, consultation_id)?)?;
            let prescriptions = PrescriptionService::list_for_consultation(conn, consultation_id)?;
            Ok::<_, AppError>(prescriptions)
        })
        .await?;

    let prescriptions: Vec<PrescriptionView> =
        prescriptions.into_iter().map(PrescriptionView::from).collect();
    Ok(Json(json!({
        "total": prescriptions.len(),
        "prescriptions": prescriptions
    })))
}

#[axum::debug_handler]
pub async fn update_prescription_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(prescription_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdatePrescriptionStatusRequest>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::ClinicalRecords)?;

    let prescription = state
        .db
        .write(move |conn| {
            ensure_doctor_scope(&user, PrescriptionService::owning_doctor(conn, prescription_id)?)?;
            let updated =
                PrescriptionService::update_status(conn, prescription_id, request.status, &user, &client)?;
            Ok::<_, AppError>(updated)
        })
        .await?;

    Ok(Json(json!({
        "message": "Prescription status updated",
        "prescription": PrescriptionView::from(prescription)
    })))
}
