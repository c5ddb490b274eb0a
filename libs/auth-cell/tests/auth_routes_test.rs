use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use auth_cell::auth_routes;
use security_cell::PasswordSecurityService;
use shared_config::AppConfig;
use shared_utils::state::AppState;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = auth_routes(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn seed_user(state: &AppState, user: TestUser, password: &str) -> TestUser {
    let hash = PasswordSecurityService::hash_password(password).unwrap();
    let user = user.with_password_hash(&hash);
    user.insert(&state.db).await.unwrap();
    user
}

fn login_body(email: &str, password: &str) -> Value {
    json!({ "email": email, "password": password })
}

#[tokio::test]
async fn login_returns_token_and_profile() {
    let state = TestConfig::default().to_state();
    seed_user(&state, TestUser::doctor("doc@clinic.test"), "secret-pass").await;

    let (status, body) = send(
        &state,
        json_request("POST", "/login", None, login_body("DOC@clinic.test", "secret-pass")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["user"]["role"], "doctor");
    assert!(body["user"]["doctor"]["license_number"].is_string());
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn bad_credentials_share_one_message() {
    let state = TestConfig::default().to_state();
    seed_user(&state, TestUser::nurse("nurse@clinic.test"), "secret-pass").await;

    let (wrong_status, wrong) = send(
        &state,
        json_request("POST", "/login", None, login_body("nurse@clinic.test", "bad")),
    )
    .await;
    let (unknown_status, unknown) = send(
        &state,
        json_request("POST", "/login", None, login_body("nobody@clinic.test", "bad")),
    )
    .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, json!({ "error": "Invalid credentials" }));
    assert_eq!(unknown, wrong);
}

#[tokio::test]
async fn sixth_login_attempt_is_rate_limited() {
    let state = TestConfig::default().to_state();
    seed_user(&state, TestUser::nurse("nurse@clinic.test"), "secret-pass").await;

    for _ in 0..5 {
        let (status, _) = send(
            &state,
            json_request("POST", "/login", None, login_body("nurse@clinic.test", "bad")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = send(
        &state,
        json_request("POST", "/login", None, login_body("nurse@clinic.test", "secret-pass")),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retry_after"].as_u64().is_some());
}

fn login_from_peer(forwarded_for: &str, password: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/json")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(login_body("nurse@clinic.test", password).to_string()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 4], 40000))));
    request
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_login_limit() {
    let state = TestConfig::default().to_state();
    seed_user(&state, TestUser::nurse("nurse@clinic.test"), "secret-pass").await;

    for i in 0..5 {
        let (status, _) = send(&state, login_from_peer(&format!("203.0.113.{}", i), "bad")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = send(&state, login_from_peer("203.0.113.99", "bad")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn trusted_proxy_limits_each_forwarded_client() {
    let config = TestConfig::default();
    let state = config.state_with(AppConfig {
        trust_proxy: true,
        ..config.to_app_config()
    });
    seed_user(&state, TestUser::nurse("nurse@clinic.test"), "secret-pass").await;

    for _ in 0..5 {
        send(&state, login_from_peer("203.0.113.1", "bad")).await;
    }
    let (status, _) = send(&state, login_from_peer("203.0.113.1", "bad")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = send(&state, login_from_peer("203.0.113.2", "bad")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn successful_login_resets_attempt_counter() {
    let state = TestConfig::default().to_state();
    seed_user(&state, TestUser::nurse("nurse@clinic.test"), "secret-pass").await;

    for _ in 0..4 {
        send(&state, json_request("POST", "/login", None, login_body("nurse@clinic.test", "bad"))).await;
    }
    let (status, _) = send(
        &state,
        json_request("POST", "/login", None, login_body("nurse@clinic.test", "secret-pass")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..4 {
        let (status, _) = send(
            &state,
            json_request("POST", "/login", None, login_body("nurse@clinic.test", "bad")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn malformed_login_body_is_bad_request() {
    let state = TestConfig::default().to_state();
    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn profile_and_verify_require_token() {
    let state = TestConfig::default().to_state();
    let nurse = seed_user(&state, TestUser::nurse("nurse@clinic.test"), "secret-pass").await;
    let token = JwtTestUtils::create_test_token(&nurse, &state.config.jwt_secret, None);

    let (status, _) = send(&state, json_request("GET", "/profile", None, Value::Null)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&state, json_request("GET", "/profile", Some(&token), Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "nurse@clinic.test");
    assert!(body["user"]["doctor"].is_null());

    let (status, body) = send(&state, json_request("GET", "/verify", Some(&token), Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["user"]["id"], nurse.id.to_string());
    assert!(body["expires_at"].is_string());
}

#[tokio::test]
async fn change_password_flow() {
    let state = TestConfig::default().to_state();
    let nurse = seed_user(&state, TestUser::nurse("nurse@clinic.test"), "secret-pass").await;
    let token = JwtTestUtils::create_test_token(&nurse, &state.config.jwt_secret, None);

    let (status, _) = send(
        &state,
        json_request(
            "PUT",
            "/change-password",
            Some(&token),
            json!({ "currentPassword": "wrong-pass", "newPassword": "brand-new" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &state,
        json_request(
            "PUT",
            "/change-password",
            Some(&token),
            json!({ "currentPassword": "secret-pass", "newPassword": "abc" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &state,
        json_request(
            "PUT",
            "/change-password",
            Some(&token),
            json!({ "currentPassword": "secret-pass", "newPassword": "brand-new" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &state,
        json_request("POST", "/login", None, login_body("nurse@clinic.test", "brand-new")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn only_admin_creates_users() {
    let state = TestConfig::default().to_state();
    let admin = TestUser::admin("admin@clinic.test");
    admin.insert(&state.db).await.unwrap();
    let nurse = TestUser::nurse("nurse@clinic.test");
    nurse.insert(&state.db).await.unwrap();
    let body = json!({
        "email": "reception@clinic.test",
        "password": "welcome1",
        "first_name": "Rosa",
        "last_name": "Diaz",
        "role": "receptionist"
    });

    let nurse_token = JwtTestUtils::create_test_token(&nurse, &state.config.jwt_secret, None);
    let (status, _) = send(&state, json_request("POST", "/users", Some(&nurse_token), body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin_token = JwtTestUtils::create_test_token(&admin, &state.config.jwt_secret, None);
    let (status, created) = send(&state, json_request("POST", "/users", Some(&admin_token), body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["user"]["role"], "receptionist");

    let (status, _) = send(&state, json_request("POST", "/users", Some(&admin_token), body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
