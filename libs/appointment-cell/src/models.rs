use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use doctor_cell::DoctorError;
use patient_cell::PatientError;
use shared_config::AppConfig;
use shared_database::DatabaseError;
use shared_models::error::AppError;
use shared_models::pagination::PageParams;

pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 240;
pub const DEFAULT_DURATION_MINUTES: u32 = 30;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Attended,
    Paid,
    Unpaid,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Attended,
        AppointmentStatus::Paid,
        AppointmentStatus::Unpaid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Attended => "attended",
            AppointmentStatus::Paid => "paid",
            AppointmentStatus::Unpaid => "unpaid",
        }
    }

    /// `attended` and `cancelled` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Attended | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown appointment status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    MedicalConsultation,
    Emergency,
    Procedure,
    ControlConsultation,
}

impl AppointmentType {
    pub const ALL: [AppointmentType; 4] = [
        AppointmentType::MedicalConsultation,
        AppointmentType::Emergency,
        AppointmentType::Procedure,
        AppointmentType::ControlConsultation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::MedicalConsultation => "medical_consultation",
            AppointmentType::Emergency => "emergency",
            AppointmentType::Procedure => "procedure",
            AppointmentType::ControlConsultation => "control_consultation",
        }
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown appointment type: {}", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_name: String,
    pub doctor_name: String,
    pub appointment_type: AppointmentType,
    pub date_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub description: Option<String>,
    pub status: AppointmentStatus,
    pub external_code: Option<String>,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.date_time + Duration::minutes(self.duration_minutes as i64)
    }

    /// Still open (pending or confirmed) after its slot has ended.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        ) && self.end_time() < now
    }
}

/// Fully validated values for a new appointment row.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_type: AppointmentType,
    pub date_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub description: Option<String>,
    pub status: AppointmentStatus,
    pub external_code: Option<String>,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

/// Clinic-wide scheduling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingRules {
    pub default_window_minutes: i64,
    pub utc_offset_minutes: i32,
}

impl SchedulingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_window_minutes: config.conflict_window_minutes,
            utc_offset_minutes: config.clinic_utc_offset_minutes,
        }
    }

    /// Half-width of the conflict window around a start time.
    pub fn window_for(&self, requested_duration: Option<u32>) -> Duration {
        Duration::minutes(
            requested_duration
                .map(i64::from)
                .unwrap_or(self.default_window_minutes),
        )
    }
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ==============================================================================
// REQUEST / QUERY MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_type: AppointmentType,
    pub date_time: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub description: Option<String>,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub doctor_id: Option<Uuid>,
    pub appointment_type: Option<AppointmentType>,
    pub date_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub description: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl AppointmentListQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailyScheduleQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    pub doctor_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AppointmentStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySchedule {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub appointments: Vec<Appointment>,
    pub total: usize,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found or inactive")]
    PatientNotFound,

    #[error("Doctor not found or inactive")]
    DoctorNotFound,

    #[error("Cannot schedule appointments in the past")]
    PastDate,

    #[error("Doctor already has an appointment in this time slot")]
    Conflict { conflicting_appointment_id: Uuid },

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for AppointmentError {
    fn from(err: rusqlite::Error) -> Self {
        AppointmentError::Database(err.into())
    }
}

impl From<DoctorError> for AppointmentError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::Database(e) => AppointmentError::Database(e),
            _ => AppointmentError::DoctorNotFound,
        }
    }
}

impl From<PatientError> for AppointmentError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::NotFound => AppointmentError::PatientNotFound,
            PatientError::Database(e) => AppointmentError::Database(e),
            other => AppointmentError::Validation(other.to_string()),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound
            | AppointmentError::PatientNotFound
            | AppointmentError::DoctorNotFound => AppError::NotFound(err.to_string()),
            AppointmentError::PastDate | AppointmentError::InvalidTransition(_) => {
                AppError::BadRequest(err.to_string())
            }
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::Conflict {
                conflicting_appointment_id,
            } => AppError::ConflictWithDetails {
                message: err.to_string(),
                details: json!({ "conflicting_appointment_id": conflicting_appointment_id }),
            },
            AppointmentError::Database(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_attended_and_cancelled_are_terminal() {
        let terminal: Vec<_> = AppointmentStatus::ALL
            .into_iter()
            .filter(AppointmentStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![AppointmentStatus::Cancelled, AppointmentStatus::Attended]);
    }

    #[test]
    fn window_falls_back_to_configured_default() {
        let rules = SchedulingRules::default();
        assert_eq!(rules.window_for(None), Duration::minutes(30));
        assert_eq!(rules.window_for(Some(60)), Duration::minutes(60));
    }

    #[test]
    fn conflict_maps_to_409_with_id() {
        let id = Uuid::new_v4();
        let err: AppError = AppointmentError::Conflict {
            conflicting_appointment_id: id,
        }
        .into();
        match err {
            AppError::ConflictWithDetails { details, .. } => {
                assert_eq!(details["conflicting_appointment_id"], id.to_string());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn type_and_status_parse_wire_names() {
        assert_eq!(
            "control_consultation".parse::<AppointmentType>().unwrap(),
            AppointmentType::ControlConsultation
        );
        assert_eq!("unpaid".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::Unpaid);
        assert!("no_show".parse::<AppointmentStatus>().is_err());
    }
}
