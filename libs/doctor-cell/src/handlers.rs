use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::AuthUser;
use shared_models::error::AppError;
use shared_utils::authorization::{require_permission, Permission};
use shared_utils::extractor::{ApiJson, ClientInfo};
use shared_utils::state::AppState;

use crate::models::{CreateDoctorRequest, DoctorSearchQuery};
use crate::services::DoctorService;

#[axum::debug_handler]
pub async fn create_doctor(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_permission(&user, Permission::Administration)?;

    let doctor = state
        .db
        .write(move |conn| DoctorService::create_doctor(conn, request, &user, &client))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Doctor created successfully", "doctor": doctor })),
    ))
}

#[axum::debug_handler]
pub async fn get_doctor(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::DoctorRead)?;

    let doctor = state
        .db
        .read(move |conn| DoctorService::get_doctor(conn, doctor_id))
        .await?;

    Ok(Json(json!({ "doctor": doctor })))
}

#[axum::debug_handler]
pub async fn list_doctors(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<DoctorSearchQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::DoctorRead)?;

    let doctors = state
        .db
        .read(move |conn| DoctorService::list_doctors(conn, &query))
        .await?;

    Ok(Json(json!({
        "doctors": doctors,
        "total": doctors.len()
    })))
}
