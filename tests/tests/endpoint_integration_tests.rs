use axum::http::StatusCode;
use serde_json::json;

use endpoint_integration_tests::{ApiTestClient, API_PREFIX, TEST_PASSWORD};
use external_cell::sign_payload;
use shared_utils::test_utils::TestUser;

fn api(path: &str) -> String {
    format!("{}{}", API_PREFIX, path)
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let client = ApiTestClient::new();

    let (status, body) = client.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert!(body["version"].is_string());

    let (status, body) = client.get("/api/v1/nothing-here").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn authentication_flow() {
    let mut client = ApiTestClient::new();
    client.seed_user(TestUser::admin("admin@clinic.test")).await;

    let (status, body) = client.authenticate("admin@clinic.test", "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, unknown) = client.authenticate("ghost@clinic.test", "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown["error"], body["error"]);

    let (status, body) = client.authenticate("ADMIN@clinic.test", TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "admin");

    let (status, _) = client.get(&api("/auth/verify")).await;
    assert_eq!(status, StatusCode::OK);

    client.logout_locally();
    let (status, _) = client.get(&api("/auth/profile")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn clinical_visit_end_to_end() {
    let mut client = ApiTestClient::new();
    let admin = client.seed_user(TestUser::admin("admin@clinic.test")).await;
    let doctor = client.seed_user(TestUser::doctor("doc@clinic.test")).await;
    let doctor_id = doctor.doctor_id.unwrap();

    client.authenticate(&doctor.email, TEST_PASSWORD).await;

    let (status, body) = client
        .post(
            &api("/patients"),
            json!({
                "document_type": "dni",
                "document_number": "12345678",
                "first_name": "Juan",
                "paternal_surname": "Perez"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["patient"]["history_number"], "HCE-000001");
    let patient_id = body["patient"]["id"].as_str().unwrap().to_string();

    let booking = json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "appointment_type": "medical_consultation",
        "date_time": "2030-01-01T10:00:00Z"
    });
    let (status, body) = client.post(&api("/appointments"), booking).await;
    assert_eq!(status, StatusCode::CREATED);
    let appointment_id = body["appointment"]["id"].as_str().unwrap().to_string();

    let clash = json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "appointment_type": "medical_consultation",
        "date_time": "2030-01-01T10:15:00Z"
    });
    let (status, _) = client.post(&api("/appointments"), clash).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = client
        .put(&api(&format!("/appointments/{}/attend", appointment_id)), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "attended");

    let (status, body) = client
        .post(
            &api("/consultations"),
            json!({
                "appointment_id": appointment_id,
                "chief_complaint": "Headache",
                "weight_kg": 70.0,
                "height_cm": 175.0
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["consultation"]["bmi"], 22.86);
    let consultation_id = body["consultation"]["id"].as_str().unwrap().to_string();

    let (status, body) = client
        .post(
            &api(&format!("/consultations/{}/prescriptions", consultation_id)),
            json!({
                "medication_name": "Paracetamol",
                "concentration": "500mg",
                "dose": "1 tablet",
                "frequency": "every 8 hours",
                "duration": "5 days",
                "quantity": 15
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["prescription"]["status"], "active");

    let (status, body) = client
        .get(&api(&format!("/consultations/appointment/{}", appointment_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prescriptions"].as_array().unwrap().len(), 1);

    client.authenticate(&admin.email, TEST_PASSWORD).await;
    let (status, body) = client
        .get(&api(&format!("/audit/entity/appointment/{}", appointment_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["total"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn legacy_prefix_serves_the_same_routes() {
    let mut client = ApiTestClient::new();
    client.seed_user(TestUser::admin("admin@clinic.test")).await;
    client.authenticate("admin@clinic.test", TEST_PASSWORD).await;

    let (v1_status, v1) = client.get("/api/v1/doctors").await;
    let (legacy_status, legacy) = client.get("/api/doctors").await;
    assert_eq!(v1_status, StatusCode::OK);
    assert_eq!(legacy_status, StatusCode::OK);
    assert_eq!(v1, legacy);
}

#[tokio::test]
async fn signed_billing_webhook() {
    let client = ApiTestClient::new();
    let doctor = client.seed_user(TestUser::doctor("doc@clinic.test")).await;
    let secret = client.state.config.billing_webhook_secret.clone();

    let payload = json!({
        "event_type": "appointment.created",
        "data": {
            "patient": { "dni": "87654321", "names": "Ana Torres" },
            "appointment": {
                "external_code": "BILL-900",
                "doctor_id": doctor.doctor_id.unwrap(),
                "date_time": "2030-05-05T14:00:00Z",
                "type": "procedure"
            }
        }
    })
    .to_string();
    let signature = format!("sha256={}", sign_payload(&secret, payload.as_bytes()).unwrap());

    let (status, body) = client
        .send(
            "POST",
            &api("/external/webhook/billing"),
            Some(payload.clone()),
            &[("x-signature", signature.as_str())],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["result"]["action"], "created");
    assert_eq!(body["result"]["patient_created"], true);

    let (status, _) = client
        .send(
            "POST",
            &api("/external/webhook/billing"),
            Some(payload),
            &[("x-signature", "sha256=deadbeef")],
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
