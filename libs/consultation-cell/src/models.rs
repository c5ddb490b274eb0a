use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::AppointmentError;
use shared_database::DatabaseError;
use shared_models::error::AppError;

pub const DEFAULT_ROUTE: &str = "oral";
pub const DEFAULT_UNIT: &str = "units";

// ==============================================================================
// CONSULTATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consultation {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub bmi: Option<f64>,
    pub blood_pressure_systolic: Option<u32>,
    pub blood_pressure_diastolic: Option<u32>,
    pub heart_rate: Option<u32>,
    pub respiratory_rate: Option<u32>,
    pub temperature_c: Option<f64>,
    pub oxygen_saturation: Option<u32>,
    pub chief_complaint: Option<String>,
    pub current_illness: Option<String>,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub current_medications: Option<String>,
    pub physical_examination: Option<String>,
    pub primary_diagnosis: Option<String>,
    pub primary_diagnosis_code: Option<String>,
    pub secondary_diagnoses: Vec<String>,
    pub treatment_plan: Option<String>,
    pub recommendations: Option<String>,
    pub notes: Option<String>,
    pub next_appointment_date: Option<NaiveDate>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consultation {
    /// `"120/80"` when both readings are present.
    pub fn blood_pressure(&self) -> Option<String> {
        match (self.blood_pressure_systolic, self.blood_pressure_diastolic) {
            (Some(systolic), Some(diastolic)) => Some(format!("{}/{}", systolic, diastolic)),
            _ => None,
        }
    }

    pub fn bmi_classification(&self) -> Option<BmiClassification> {
        self.bmi.map(BmiClassification::from_bmi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BmiClassification {
    Underweight,
    Normal,
    Overweight,
    ObesityClassI,
    ObesityClassII,
    ObesityClassIII,
}

impl BmiClassification {
    pub fn from_bmi(bmi: f64) -> Self {
        match bmi {
            b if b < 18.5 => BmiClassification::Underweight,
            b if b < 25.0 => BmiClassification::Normal,
            b if b < 30.0 => BmiClassification::Overweight,
            b if b < 35.0 => BmiClassification::ObesityClassI,
            b if b < 40.0 => BmiClassification::ObesityClassII,
            _ => BmiClassification::ObesityClassIII,
        }
    }
}

/// Response shape for a consultation with its derived fields.
#[derive(Debug, Clone, Serialize)]
pub struct ConsultationView {
    #[serde(flatten)]
    pub consultation: Consultation,
    pub blood_pressure: Option<String>,
    pub bmi_classification: Option<BmiClassification>,
}

impl From<Consultation> for ConsultationView {
    fn from(consultation: Consultation) -> Self {
        Self {
            blood_pressure: consultation.blood_pressure(),
            bmi_classification: consultation.bmi_classification(),
            consultation,
        }
    }
}

/// Clinical fields shared by record and update requests. On update, absent
/// fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsultationFields {
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub blood_pressure_systolic: Option<u32>,
    pub blood_pressure_diastolic: Option<u32>,
    pub heart_rate: Option<u32>,
    pub respiratory_rate: Option<u32>,
    pub temperature_c: Option<f64>,
    pub oxygen_saturation: Option<u32>,
    pub chief_complaint: Option<String>,
    pub current_illness: Option<String>,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub current_medications: Option<String>,
    pub physical_examination: Option<String>,
    pub primary_diagnosis: Option<String>,
    pub primary_diagnosis_code: Option<String>,
    pub secondary_diagnoses: Option<Vec<String>>,
    pub treatment_plan: Option<String>,
    pub recommendations: Option<String>,
    pub notes: Option<String>,
    pub next_appointment_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordConsultationRequest {
    pub appointment_id: Uuid,
    #[serde(flatten)]
    pub fields: ConsultationFields,
}

// ==============================================================================
// PRESCRIPTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    Completed,
    Cancelled,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Active => "active",
            PrescriptionStatus::Completed => "completed",
            PrescriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PrescriptionStatus::Active)
    }
}

impl fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrescriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PrescriptionStatus::Active),
            "completed" => Ok(PrescriptionStatus::Completed),
            "cancelled" => Ok(PrescriptionStatus::Cancelled),
            other => Err(format!("Unknown prescription status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub medication_name: String,
    pub generic_name: Option<String>,
    pub concentration: Option<String>,
    pub pharmaceutical_form: Option<String>,
    pub dose: String,
    pub frequency: String,
    pub route: String,
    pub duration: String,
    pub quantity: u32,
    pub unit: String,
    pub instructions: Option<String>,
    pub status: PrescriptionStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_chronic: bool,
    pub requires_monitoring: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// Printable instructions for the patient.
    pub fn full_instructions(&self) -> String {
        let mut text = self.medication_name.clone();
        if let Some(concentration) = &self.concentration {
            text.push(' ');
            text.push_str(concentration);
        }
        if let Some(form) = &self.pharmaceutical_form {
            text.push_str(&format!(" ({})", form));
        }
        text.push_str(&format!("\nDose: {}", self.dose));
        text.push_str(&format!("\nFrequency: {}", self.frequency));
        text.push_str(&format!("\nRoute: {}", self.route));
        text.push_str(&format!("\nDuration: {}", self.duration));
        text.push_str(&format!("\nTotal quantity: {} {}", self.quantity, self.unit));
        if let Some(instructions) = &self.instructions {
            text.push_str(&format!("\nInstructions: {}", instructions));
        }
        text
    }

    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.status == PrescriptionStatus::Active && self.end_date.is_none_or(|end| end >= today)
    }

    pub fn is_currently_active(&self) -> bool {
        self.is_active_on(Utc::now().date_naive())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrescriptionView {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub full_instructions: String,
    pub is_currently_active: bool,
}

impl From<Prescription> for PrescriptionView {
    fn from(prescription: Prescription) -> Self {
        Self {
            full_instructions: prescription.full_instructions(),
            is_currently_active: prescription.is_currently_active(),
            prescription,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub medication_name: String,
    pub generic_name: Option<String>,
    pub concentration: Option<String>,
    pub pharmaceutical_form: Option<String>,
    pub dose: String,
    pub frequency: String,
    pub route: Option<String>,
    pub duration: String,
    pub quantity: i64,
    pub unit: Option<String>,
    pub instructions: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_chronic: bool,
    #[serde(default)]
    pub requires_monitoring: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePrescriptionStatusRequest {
    pub status: PrescriptionStatus,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConsultationError {
    #[error("Consultation not found")]
    NotFound,

    #[error("Prescription not found")]
    PrescriptionNotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Consultations can only be recorded for attended appointments")]
    AppointmentNotAttended,

    #[error("A consultation already exists for this appointment")]
    AlreadyRecorded,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for ConsultationError {
    fn from(err: rusqlite::Error) -> Self {
        ConsultationError::Database(err.into())
    }
}

impl From<AppointmentError> for ConsultationError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::Database(e) => ConsultationError::Database(e),
            _ => ConsultationError::AppointmentNotFound,
        }
    }
}

impl From<ConsultationError> for AppError {
    fn from(err: ConsultationError) -> Self {
        match err {
            ConsultationError::NotFound
            | ConsultationError::PrescriptionNotFound
            | ConsultationError::AppointmentNotFound => AppError::NotFound(err.to_string()),
            ConsultationError::AppointmentNotAttended | ConsultationError::InvalidTransition(_) => {
                AppError::BadRequest(err.to_string())
            }
            ConsultationError::AlreadyRecorded => AppError::Conflict(err.to_string()),
            ConsultationError::Validation(msg) => AppError::ValidationError(msg),
            ConsultationError::Database(e) => e.into(),
        }
    }
}
