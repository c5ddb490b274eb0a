use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;
use shared_models::pagination::PageParams;

pub const HISTORY_NUMBER_PREFIX: &str = "HCE-";
pub const MAX_HISTORY_SEQUENCE: i64 = 999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Dni,
    ForeignCard,
    Passport,
    NoDocument,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Dni => "dni",
            DocumentType::ForeignCard => "foreign_card",
            DocumentType::Passport => "passport",
            DocumentType::NoDocument => "no_document",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dni" => Ok(DocumentType::Dni),
            "foreign_card" => Ok(DocumentType::ForeignCard),
            "passport" => Ok(DocumentType::Passport),
            "no_document" => Ok(DocumentType::NoDocument),
            other => Err(format!("Unknown document type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
    O,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
            Gender::O => "O",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M" => Ok(Gender::M),
            "F" => Ok(Gender::F),
            "O" => Ok(Gender::O),
            other => Err(format!("Unknown gender: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub document_type: DocumentType,
    pub document_number: String,
    pub first_name: String,
    pub paternal_surname: String,
    pub maternal_surname: Option<String>,
    pub history_number: String,
    pub external_code: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        match self.maternal_surname.as_deref() {
            Some(maternal) if !maternal.is_empty() => {
                format!("{} {} {}", self.first_name, self.paternal_surname, maternal)
            }
            _ => format!("{} {}", self.first_name, self.paternal_surname),
        }
    }

    /// Whole years completed on `today`.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|birth| today.years_since(birth))
    }

    pub fn age(&self) -> Option<u32> {
        self.age_on(Utc::now().date_naive())
    }
}

/// Patient plus its derived fields, as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct PatientView {
    #[serde(flatten)]
    pub patient: Patient,
    pub full_name: String,
    pub age: Option<u32>,
}

impl From<Patient> for PatientView {
    fn from(patient: Patient) -> Self {
        Self {
            full_name: patient.full_name(),
            age: patient.age(),
            patient,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentAppointment {
    pub id: Uuid,
    pub date_time: DateTime<Utc>,
    pub appointment_type: String,
    pub status: String,
    pub doctor_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientDetail {
    #[serde(flatten)]
    pub patient: PatientView,
    pub recent_appointments: Vec<RecentAppointment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePatientRequest {
    pub document_type: DocumentType,
    pub document_number: String,
    pub first_name: String,
    pub paternal_surname: String,
    pub maternal_surname: Option<String>,
    pub history_number: Option<String>,
    pub external_code: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub document_type: Option<DocumentType>,
    pub document_number: Option<String>,
    pub first_name: Option<String>,
    pub paternal_surname: Option<String>,
    pub maternal_surname: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientListQuery {
    pub search: Option<String>,
    pub document_type: Option<DocumentType>,
    pub gender: Option<Gender>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PatientListQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSearchQuery {
    #[serde(default = "default_document_type")]
    pub document_type: DocumentType,
    pub document_number: String,
}

fn default_document_type() -> DocumentType {
    DocumentType::Dni
}

#[derive(Debug, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("A patient with this document is already registered")]
    DocumentTaken,

    #[error("History number already in use")]
    HistoryNumberTaken,

    #[error("History number sequence exhausted")]
    HistoryNumbersExhausted,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for PatientError {
    fn from(err: rusqlite::Error) -> Self {
        PatientError::Database(err.into())
    }
}

impl From<PatientError> for AppError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::NotFound => AppError::NotFound(err.to_string()),
            PatientError::DocumentTaken
            | PatientError::HistoryNumberTaken
            | PatientError::HistoryNumbersExhausted => AppError::Conflict(err.to_string()),
            PatientError::Validation(msg) => AppError::ValidationError(msg),
            PatientError::Database(e) => e.into(),
        }
    }
}
