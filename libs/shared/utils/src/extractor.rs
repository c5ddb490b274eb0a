use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{
        rejection::JsonRejection, ConnectInfo, FromRef, FromRequest, FromRequestParts,
        OptionalFromRequest, Request, State,
    },
    http::{request::Parts, Request as HttpRequest},
    middleware::Next,
    response::Response,
    Json,
};
use headers::{authorization::Bearer, Authorization, HeaderMapExt, UserAgent};
use serde::de::DeserializeOwned;
use rusqlite::{Connection, OptionalExtension};
use shared_database::{parse_column, DatabaseError};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::AuthUser;
use shared_models::error::AppError;

use crate::jwt::validate_token;
use crate::rate_limit::{client_ip, enforce};
use crate::state::AppState;

/// Pulls the bearer token from `Authorization`, falling back to `x-auth-token`.
fn bearer_token(request: &HttpRequest<Body>) -> Result<String, AppError> {
    if let Some(Authorization(bearer)) = request.headers().typed_get::<Authorization<Bearer>>() {
        return Ok(bearer.token().to_string());
    }

    if request.headers().contains_key("Authorization") {
        return Err(AppError::Auth("Invalid authorization header format".to_string()));
    }

    request
        .headers()
        .get("x-auth-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))
}

/// Middleware for authentication: the token must verify and name a user that is
/// still active.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: HttpRequest<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)?;
    let claims = validate_token(&token, &state.config.jwt_secret)?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Auth("Invalid token".to_string()))?;

    let user = state
        .db
        .read(move |conn| load_active_user(conn, user_id))
        .await?
        .ok_or_else(|| AppError::Auth("User not found or inactive".to_string()))?;

    let key = format!("user:{}", user.id);
    enforce(state.rate_limiter.as_ref(), &key, state.config.rate_limit_per_user).await?;

    debug!("Authenticated {} ({})", user.email, user.role);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Loads an active user together with their doctor profile id, if any.
pub fn load_active_user(conn: &Connection, user_id: Uuid) -> Result<Option<AuthUser>, DatabaseError> {
    let user = conn
        .query_row(
            "SELECT u.id, u.email, u.first_name, u.last_name, u.role, d.id AS doctor_id
             FROM users u
             LEFT JOIN doctors d ON d.user_id = u.id AND d.is_active = 1
             WHERE u.id = ?1 AND u.is_active = 1",
            [user_id],
            |row| {
                Ok(AuthUser {
                    id: row.get("id")?,
                    email: row.get("email")?,
                    first_name: row.get("first_name")?,
                    last_name: row.get("last_name")?,
                    role: parse_column(row, "role")?,
                    doctor_id: row.get("doctor_id")?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

/// JSON body extractor whose rejections use the API error shape.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match <Json<T> as FromRequest<S>>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection_to_error(rejection)),
        }
    }
}

/// `Option<ApiJson<T>>` is `None` when the request carries no JSON content type.
impl<S, T> OptionalFromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        match <Json<T> as OptionalFromRequest<S>>::from_request(req, state).await {
            Ok(value) => Ok(value.map(|Json(value)| Self(value))),
            Err(rejection) => Err(json_rejection_to_error(rejection)),
        }
    }
}

fn json_rejection_to_error(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

/// Request origin recorded in audit entries.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl<S> FromRequestParts<S> for ClientInfo
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let ip = client_ip(
            &parts.headers,
            parts.extensions.get::<ConnectInfo<SocketAddr>>(),
            app_state.config.trust_proxy,
        );
        Ok(Self {
            ip_address: Some(ip).filter(|ip| ip != "unknown"),
            user_agent: parts
                .headers
                .typed_get::<UserAgent>()
                .map(|ua| ua.as_str().to_string()),
        })
    }
}
