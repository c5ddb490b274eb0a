use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use appointment_cell::{AppointmentError, AppointmentStatus, AppointmentType};
use patient_cell::{Gender, PatientError};
use shared_database::DatabaseError;
use shared_models::error::AppError;

/// Payment method recorded for appointments the billing system reports as paid.
pub const BILLING_PAYMENT_METHOD: &str = "billing_system";
/// Prefix of the external code given to patients created by a sync.
pub const BILLING_PATIENT_PREFIX: &str = "BILLING_";
pub const MISSING_SURNAME: &str = "N/A";
pub const MAX_EXTERNAL_CODE_LEN: usize = 50;
pub const MAX_NAMES_LEN: usize = 200;

// ==============================================================================
// SYNC MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SyncPatient {
    pub dni: String,
    pub names: String,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncAppointment {
    pub external_code: String,
    pub doctor_id: Uuid,
    pub date_time: DateTime<Utc>,
    #[serde(rename = "type", alias = "appointment_type")]
    pub appointment_type: Option<AppointmentType>,
    pub duration_minutes: Option<u32>,
    pub description: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncAppointmentRequest {
    pub patient: SyncPatient,
    pub appointment: SyncAppointment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    NoChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_created: bool,
}

/// Full name split into the patient name fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitName {
    pub first_name: String,
    pub paternal_surname: String,
    pub maternal_surname: Option<String>,
}

// ==============================================================================
// PAYMENT & STATUS MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentStatusRequest {
    pub external_code: String,
    pub status: AppointmentStatus,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub payment_date: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub appointment_id: Uuid,
    pub external_code: String,
    pub status: AppointmentStatus,
    pub date_time: DateTime<Utc>,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncStatsQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPeriod {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub total_synced_appointments: u64,
    pub total_synced_patients: u64,
    pub appointments_by_status: BTreeMap<String, u64>,
    pub period: SyncPeriod,
}

// ==============================================================================
// WEBHOOK MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    AppointmentCreated,
    AppointmentUpdated,
    PaymentUpdated,
}

impl WebhookEventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "appointment.created" => Some(WebhookEventKind::AppointmentCreated),
            "appointment.updated" => Some(WebhookEventKind::AppointmentUpdated),
            "payment.updated" => Some(WebhookEventKind::PaymentUpdated),
            _ => None,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No appointment found for external code {0}")]
    UnknownExternalCode(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Billing webhook is not configured")]
    WebhookNotConfigured,

    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error(transparent)]
    Patient(#[from] PatientError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for ExternalError {
    fn from(err: rusqlite::Error) -> Self {
        ExternalError::Database(err.into())
    }
}

impl From<ExternalError> for AppError {
    fn from(err: ExternalError) -> Self {
        match err {
            ExternalError::Validation(msg) => AppError::ValidationError(msg),
            ExternalError::UnknownExternalCode(_) => AppError::NotFound(err.to_string()),
            ExternalError::InvalidSignature => AppError::Auth(err.to_string()),
            ExternalError::WebhookNotConfigured => AppError::Internal(err.to_string()),
            ExternalError::UnsupportedEvent(_) => AppError::BadRequest(err.to_string()),
            ExternalError::Appointment(e) => e.into(),
            ExternalError::Patient(e) => e.into(),
            ExternalError::Database(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sync_request_accepts_type_field() {
        let request: SyncAppointmentRequest = serde_json::from_value(json!({
            "patient": { "dni": "12345678", "names": "Juan Perez" },
            "appointment": {
                "external_code": "BILL-1",
                "doctor_id": Uuid::nil(),
                "date_time": "2030-01-01T10:00:00Z",
                "type": "emergency",
                "status": "paid",
                "price": 80.5
            }
        }))
        .unwrap();

        assert_eq!(request.appointment.appointment_type, Some(AppointmentType::Emergency));
        assert_eq!(request.appointment.status, Some(AppointmentStatus::Paid));
        assert_eq!(request.patient.gender, None);
    }

    #[test]
    fn event_kinds() {
        assert_eq!(
            WebhookEventKind::parse("payment.updated"),
            Some(WebhookEventKind::PaymentUpdated)
        );
        assert_eq!(WebhookEventKind::parse("patient.deleted"), None);
    }

    #[test]
    fn signature_failure_is_unauthorized() {
        let err: AppError = ExternalError::InvalidSignature.into();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);

        let err: AppError = ExternalError::UnsupportedEvent("x".to_string()).into();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
