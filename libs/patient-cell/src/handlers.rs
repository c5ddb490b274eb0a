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
use shared_utils::authorization::{require_permission, Permission};
use shared_utils::extractor::{ApiJson, ClientInfo};
use shared_utils::state::AppState;

use crate::models::{
    CreatePatientRequest, DocumentSearchQuery, PatientError, PatientListQuery, PatientView,
    UpdatePatientRequest,
};
use crate::services::PatientService;

#[axum::debug_handler]
pub async fn create_patient(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_permission(&user, Permission::PatientWrite)?;

    let patient = state
        .db
        .write(move |conn| PatientService::create_patient(conn, request, &user, &client))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Patient created successfully",
            "patient": PatientView::from(patient)
        })),
    ))
}

#[axum::debug_handler]
pub async fn list_patients(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<PatientListQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::PatientRead)?;

    let page = state
        .db
        .read(move |conn| PatientService::list_patients(conn, &query))
        .await?;

    let patients: Vec<PatientView> = page.items.into_iter().map(PatientView::from).collect();
    Ok(Json(json!({
        "patients": patients,
        "pagination": page.pagination
    })))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::PatientRead)?;

    let detail = state
        .db
        .read(move |conn| PatientService::get_detail(conn, patient_id))
        .await?;

    Ok(Json(json!({ "patient": detail })))
}

/// Identity-document lookup, the only patient read open to receptionists.
#[axum::debug_handler]
pub async fn search_by_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<DocumentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::PatientSearch)?;
    debug!("Searching patient by {} document", query.document_type);

    let patient = state
        .db
        .read(move |conn| {
            PatientService::find_by_document(conn, query.document_type, &query.document_number)?
                .ok_or(PatientError::NotFound)
        })
        .await?;

    Ok(Json(json!({ "patient": PatientView::from(patient) })))
}

#[axum::debug_handler]
pub async fn update_patient(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(patient_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::PatientWrite)?;

    let patient = state
        .db
        .write(move |conn| PatientService::update_patient(conn, patient_id, request, &user, &client))
        .await?;

    Ok(Json(json!({
        "message": "Patient updated successfully",
        "patient": PatientView::from(patient)
    })))
}

#[axum::debug_handler]
pub async fn delete_patient(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::PatientWrite)?;

    state
        .db
        .write(move |conn| PatientService::delete_patient(conn, patient_id, &user, &client))
        .await?;

    Ok(Json(json!({ "message": "Patient deleted successfully" })))
}
