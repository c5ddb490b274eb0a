use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use doctor_cell::router::doctor_routes;
use shared_models::auth::Role;
use shared_utils::state::AppState;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

async fn send(state: &AppState, user: &TestUser, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let token = JwtTestUtils::create_test_token(user, &state.config.jwt_secret, None);
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = doctor_routes(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn admin_creates_doctor_profile() {
    let state = TestConfig::default().to_state();
    let admin = TestUser::admin("admin@clinic.test");
    admin.insert(&state.db).await.unwrap();
    let mut account = TestUser::new("new.doc@clinic.test", Role::Doctor);
    account.doctor_id = None;
    account.insert(&state.db).await.unwrap();

    let (status, body) = send(
        &state,
        &admin,
        "POST",
        "/",
        Some(json!({
            "user_id": account.id,
            "license_number": "CMP-12345",
            "specialties": ["pediatrics"],
            "consultation_fee": 80.0
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["doctor"]["license_number"], "CMP-12345");
    assert_eq!(body["doctor"]["email"], "new.doc@clinic.test");

    let doctor_id = body["doctor"]["id"].as_str().unwrap().to_string();
    let (status, body) = send(&state, &admin, "GET", &format!("/{}", doctor_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["doctor"]["specialties"], json!(["pediatrics"]));
}

#[tokio::test]
async fn receptionist_lists_but_cannot_create() {
    let state = TestConfig::default().to_state();
    let receptionist = TestUser::receptionist("desk@clinic.test");
    receptionist.insert(&state.db).await.unwrap();
    TestUser::doctor("doc@clinic.test").insert(&state.db).await.unwrap();

    let (status, body) = send(&state, &receptionist, "GET", "/?specialty=general_medicine", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = send(
        &state,
        &receptionist,
        "POST",
        "/",
        Some(json!({ "user_id": receptionist.id, "license_number": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_doctor_is_not_found() {
    let state = TestConfig::default().to_state();
    let nurse = TestUser::nurse("nurse@clinic.test");
    nurse.insert(&state.db).await.unwrap();

    let (status, body) = send(&state, &nurse, "GET", &format!("/{}", uuid::Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Doctor not found");
}
