use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use chrono::DateTime;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_models::auth::AuthUser;
use shared_models::error::AppError;
use shared_utils::authorization::{require_permission, Permission};
use shared_utils::extractor::{ApiJson, ClientInfo};
use shared_utils::jwt::validate_token;
use shared_utils::rate_limit::enforce;
use shared_utils::state::AppState;

use crate::models::{ChangePasswordRequest, CreateUserRequest, LoginRequest, LoginResponse};
use crate::services::AuthService;

fn login_key(client: &ClientInfo) -> String {
    format!("login:{}", client.ip_address.as_deref().unwrap_or("unknown"))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let key = login_key(&client);
    enforce(state.rate_limiter.as_ref(), &key, state.config.rate_limit_login).await?;

    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(AppError::ValidationError(
            "Email and password are required".to_string(),
        ));
    }

    let response = AuthService::new(&state.config)
        .login(&state.db, request, &client)
        .await?;

    if let Err(e) = state.rate_limiter.reset(&key).await {
        warn!("Failed to reset login counter: {}", e);
    }
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
) -> Result<Json<Value>, AppError> {
    let config = state.config.clone();
    state
        .db
        .write(move |conn| {
            AuthService::new(&config).logout(conn, &user, &client);
            Ok::<_, AppError>(())
        })
        .await?;

    Ok(Json(json!({ "message": "Logout successful" })))
}

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    debug!("Getting profile for user: {}", user.id);

    let config = state.config.clone();
    let profile = state
        .db
        .read(move |conn| AuthService::new(&config).profile(conn, user.id))
        .await?;

    Ok(Json(json!({ "user": profile })))
}

/// Echoes the authenticated user and the token's expiry.
#[axum::debug_handler]
pub async fn verify_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<Value>, AppError> {
    let expires_at = bearer
        .and_then(|TypedHeader(Authorization(bearer))| {
            validate_token(bearer.token(), &state.config.jwt_secret).ok()
        })
        .and_then(|claims| DateTime::from_timestamp(claims.exp, 0));

    Ok(Json(json!({
        "valid": true,
        "user": user,
        "expires_at": expires_at
    })))
}

#[axum::debug_handler]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let config = state.config.clone();
    state
        .db
        .write(move |conn| AuthService::new(&config).change_password(conn, &user, request, &client))
        .await?;

    Ok(Json(json!({ "message": "Password changed successfully" })))
}

#[axum::debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_permission(&user, Permission::Administration)?;

    let config = state.config.clone();
    let created = state
        .db
        .write(move |conn| AuthService::new(&config).create_user(conn, Some(&user), request, &client))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully", "user": created })),
    ))
}
