// =====================================================================================
// SECURITY CELL HANDLERS - AUDIT TRAIL ENDPOINTS
// =====================================================================================

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::AuthUser;
use shared_models::error::AppError;
use shared_utils::authorization::{require_permission, Permission};
use shared_utils::state::AppState;

use crate::models::{AuditQuery, EntityType};
use crate::services::AuditService;

#[axum::debug_handler]
pub async fn get_entity_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::Administration)?;

    let entity_type: EntityType = entity_type
        .parse()
        .map_err(AppError::BadRequest)?;
    debug!("Fetching audit history for {} {}", entity_type, entity_id);

    let id = entity_id.clone();
    let logs = state
        .db
        .read(move |conn| AuditService::entity_history(conn, entity_type, &id, query.limit))
        .await?;

    Ok(Json(json!({
        "entity_type": entity_type,
        "entity_id": entity_id,
        "history": logs,
        "total": logs.len()
    })))
}

#[axum::debug_handler]
pub async fn get_user_activity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, AppError> {
    require_permission(&user, Permission::Administration)?;

    let logs = state
        .db
        .read(move |conn| AuditService::user_activity(conn, user_id, query.limit))
        .await?;

    Ok(Json(json!({
        "user_id": user_id,
        "activity": logs,
        "total": logs.len()
    })))
}
