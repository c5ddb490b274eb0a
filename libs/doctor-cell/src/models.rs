use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub license_number: String,
    pub specialties: Vec<String>,
    pub external_code: Option<String>,
    pub license_expiry: Option<NaiveDate>,
    pub consultation_fee: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
    }

    pub fn is_license_expired(&self, today: NaiveDate) -> bool {
        self.license_expiry.is_some_and(|expiry| expiry < today)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDoctorRequest {
    pub user_id: Uuid,
    pub license_number: String,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub external_code: Option<String>,
    pub license_expiry: Option<NaiveDate>,
    pub consultation_fee: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoctorSearchQuery {
    pub specialty: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Doctor is not active")]
    Inactive,

    #[error("User not found")]
    UserNotFound,

    #[error("User must be active and have the doctor role")]
    UserNotEligible,

    #[error("User already has a doctor profile")]
    ProfileExists,

    #[error("License number already registered")]
    LicenseTaken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for DoctorError {
    fn from(err: rusqlite::Error) -> Self {
        DoctorError::Database(err.into())
    }
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound | DoctorError::UserNotFound => AppError::NotFound(err.to_string()),
            DoctorError::Inactive | DoctorError::UserNotEligible | DoctorError::Validation(_) => {
                AppError::BadRequest(err.to_string())
            }
            DoctorError::ProfileExists | DoctorError::LicenseTaken => AppError::Conflict(err.to_string()),
            DoctorError::Database(e) => e.into(),
        }
    }
}
