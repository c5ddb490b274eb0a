//! In-process client for driving the composed API router end to end.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use clinic_api::create_router;
use security_cell::PasswordSecurityService;
use shared_utils::state::AppState;
use shared_utils::test_utils::{TestConfig, TestUser};

pub const API_PREFIX: &str = "/api/v1";
pub const TEST_PASSWORD: &str = "clinic-pass-123";

/// Test client with authentication capabilities
pub struct ApiTestClient {
    pub state: AppState,
    router: Router,
    auth_token: Option<String>,
}

impl ApiTestClient {
    pub fn new() -> Self {
        let state = TestConfig::default().to_state();
        Self {
            router: create_router(state.clone()),
            state,
            auth_token: None,
        }
    }

    /// Insert a user whose password is [`TEST_PASSWORD`].
    pub async fn seed_user(&self, user: TestUser) -> TestUser {
        let hash = PasswordSecurityService::hash_password(TEST_PASSWORD).unwrap();
        let user = user.with_password_hash(&hash);
        user.insert(&self.state.db).await.unwrap();
        user
    }

    /// Log in through the API and keep the bearer token for later calls.
    pub async fn authenticate(&mut self, email: &str, password: &str) -> (StatusCode, Value) {
        self.auth_token = None;
        let (status, body) = self
            .post(
                &format!("{}/auth/login", API_PREFIX),
                json!({ "email": email, "password": password }),
            )
            .await;
        self.auth_token = body["token"].as_str().map(str::to_string);
        (status, body)
    }

    pub fn logout_locally(&mut self) {
        self.auth_token = None;
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send("GET", path, None, &[]).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", path, Some(body.to_string()), &[]).await
    }

    pub async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send("PUT", path, Some(body.to_string()), &[]).await
    }

    pub async fn delete(&self, path: &str) -> (StatusCode, Value) {
        self.send("DELETE", path, None, &[]).await
    }

    /// Raw request with a pre-serialized body and extra headers.
    pub async fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = &self.auth_token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

impl Default for ApiTestClient {
    fn default() -> Self {
        Self::new()
    }
}
