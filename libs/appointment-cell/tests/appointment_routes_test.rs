use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::appointment_routes;
use patient_cell::{CreatePatientRequest, DocumentType, PatientService};
use shared_utils::state::AppState;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct Clinic {
    state: AppState,
    admin: TestUser,
    doctor: TestUser,
    other_doctor: TestUser,
    receptionist: TestUser,
    patient_id: Uuid,
}

async fn clinic() -> Clinic {
    let state = TestConfig::default().to_state();
    let admin = TestUser::admin("admin@clinic.test");
    let doctor = TestUser::doctor("doc@clinic.test");
    let other_doctor = TestUser::doctor("other@clinic.test");
    let receptionist = TestUser::receptionist("front@clinic.test");
    for user in [&admin, &doctor, &other_doctor, &receptionist] {
        user.insert(&state.db).await.unwrap();
    }

    let patient = state
        .db
        .write(|conn| {
            PatientService::register(
                conn,
                CreatePatientRequest {
                    document_type: DocumentType::Dni,
                    document_number: "12345678".to_string(),
                    first_name: "Juan".to_string(),
                    paternal_surname: "Perez".to_string(),
                    maternal_surname: None,
                    history_number: None,
                    external_code: None,
                    birth_date: None,
                    gender: None,
                    email: None,
                    phone: None,
                    address: None,
                    emergency_contact_name: None,
                    emergency_contact_phone: None,
                },
            )
        })
        .await
        .unwrap();

    Clinic {
        state,
        admin,
        doctor,
        other_doctor,
        receptionist,
        patient_id: patient.id,
    }
}

async fn send(state: &AppState, user: &TestUser, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let token = JwtTestUtils::create_test_token(user, &state.config.jwt_secret, None);
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = appointment_routes(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn booking(c: &Clinic, doctor: &TestUser, date_time: &str) -> Value {
    json!({
        "patient_id": c.patient_id,
        "doctor_id": doctor.doctor_id.unwrap(),
        "appointment_type": "medical_consultation",
        "date_time": date_time
    })
}

async fn book(c: &Clinic, date_time: &str) -> String {
    let (status, body) = send(&c.state, &c.admin, "POST", "/", Some(booking(c, &c.doctor, date_time))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["appointment"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn second_booking_within_window_conflicts() {
    let c = clinic().await;
    let first = book(&c, "2030-01-01T10:00:00Z").await;

    let (status, body) = send(
        &c.state,
        &c.admin,
        "POST",
        "/",
        Some(booking(&c, &c.doctor, "2030-01-01T10:15:00Z")),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["conflicting_appointment_id"], first);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn other_doctor_same_time_is_fine() {
    let c = clinic().await;
    book(&c, "2030-01-01T10:00:00Z").await;

    let (status, _) = send(
        &c.state,
        &c.admin,
        "POST",
        "/",
        Some(booking(&c, &c.other_doctor, "2030-01-01T10:00:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn past_date_is_bad_request() {
    let c = clinic().await;
    let (status, _) = send(
        &c.state,
        &c.admin,
        "POST",
        "/",
        Some(booking(&c, &c.doctor, "2001-01-01T10:00:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn doctors_only_see_their_own_appointments() {
    let c = clinic().await;
    let id = book(&c, "2030-01-01T10:00:00Z").await;

    let (status, _) = send(&c.state, &c.doctor, "GET", &format!("/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&c.state, &c.other_doctor, "GET", &format!("/{}", id), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&c.state, &c.other_doctor, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointments"], json!([]));

    let foreign = format!("/?doctor_id={}", c.doctor.doctor_id.unwrap());
    let (status, _) = send(&c.state, &c.other_doctor, "GET", &foreign, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &c.state,
        &c.other_doctor,
        "POST",
        "/",
        Some(booking(&c, &c.doctor, "2030-01-02T10:00:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn receptionist_reads_daily_schedule_only() {
    let c = clinic().await;
    book(&c, "2030-01-01T15:00:00Z").await;
    book(&c, "2030-01-01T09:00:00Z").await;
    let cancelled = book(&c, "2030-01-01T12:00:00Z").await;
    book(&c, "2030-01-02T09:00:00Z").await;
    send(&c.state, &c.admin, "DELETE", &format!("/{}", cancelled), None).await;

    let uri = format!("/doctor/{}/daily?date=2030-01-01", c.doctor.doctor_id.unwrap());
    let (status, body) = send(&c.state, &c.receptionist, "GET", &uri, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["appointments"][0]["date_time"], "2030-01-01T09:00:00Z");
    assert_eq!(body["appointments"][1]["date_time"], "2030-01-01T15:00:00Z");

    let (status, _) = send(&c.state, &c.receptionist, "GET", "/", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cancel_records_reason_and_blocks_repeat() {
    let c = clinic().await;
    let id = book(&c, "2030-01-01T10:00:00Z").await;

    let (status, body) = send(
        &c.state,
        &c.admin,
        "DELETE",
        &format!("/{}", id),
        Some(json!({ "reason": "Patient travelling" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "cancelled");
    assert_eq!(body["appointment"]["notes"], "Patient travelling");

    let (status, _) = send(&c.state, &c.admin, "DELETE", &format!("/{}", id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn attended_appointment_is_frozen() {
    let c = clinic().await;
    let id = book(&c, "2030-01-01T10:00:00Z").await;

    let (status, body) = send(&c.state, &c.doctor, "PUT", &format!("/{}/attend", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "attended");

    let (status, _) = send(&c.state, &c.admin, "DELETE", &format!("/{}", id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &c.state,
        &c.admin,
        "PUT",
        &format!("/{}", id),
        Some(json!({ "notes": "late edit" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&c.state, &c.admin, "GET", &format!("/{}", id), None).await;
    assert_eq!(body["appointment"]["status"], "attended");
}

#[tokio::test]
async fn stats_count_by_status_and_type() {
    let c = clinic().await;
    book(&c, "2030-01-01T08:00:00Z").await;
    let id = book(&c, "2030-01-01T11:00:00Z").await;
    send(&c.state, &c.admin, "PUT", &format!("/{}/attend", id), None).await;

    let (status, body) = send(&c.state, &c.admin, "GET", "/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total"], 2);
    assert_eq!(body["stats"]["by_status"], json!({ "attended": 1, "pending": 1 }));
    assert_eq!(body["stats"]["by_type"], json!({ "medical_consultation": 2 }));
}

#[tokio::test]
async fn list_paginates_in_time_order() {
    let c = clinic().await;
    for hour in ["14", "08", "11"] {
        book(&c, &format!("2030-01-01T{}:00:00Z", hour)).await;
    }

    let (status, body) = send(&c.state, &c.admin, "GET", "/?limit=2&page=1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointments"][0]["date_time"], "2030-01-01T08:00:00Z");
    assert_eq!(body["appointments"][1]["date_time"], "2030-01-01T11:00:00Z");
    assert_eq!(body["pagination"]["total_pages"], 2);
}
