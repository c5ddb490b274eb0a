use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use security_cell::{AuditAction, AuditContext, AuditEntry, AuditService, EntityType};
use shared_database::parse_column;
use shared_models::auth::AuthUser;
use shared_utils::extractor::ClientInfo;

use crate::models::{
    ConsultationError, CreatePrescriptionRequest, Prescription, PrescriptionStatus, DEFAULT_ROUTE,
    DEFAULT_UNIT,
};
use crate::services::ConsultationService;

const MAX_MEDICATION_LEN: usize = 200;
const MAX_DOSAGE_LEN: usize = 100;
const MAX_SHORT_LEN: usize = 50;

pub struct PrescriptionService;

impl PrescriptionService {
    pub fn add_prescription(
        conn: &Connection,
        consultation_id: Uuid,
        request: CreatePrescriptionRequest,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Prescription, ConsultationError> {
        debug!("Adding prescription to consultation {}", consultation_id);
        ConsultationService::get_consultation(conn, consultation_id)?;

        let medication_name = required("medication_name", &request.medication_name, MAX_MEDICATION_LEN)?;
        let dose = required("dose", &request.dose, MAX_DOSAGE_LEN)?;
        let frequency = required("frequency", &request.frequency, MAX_DOSAGE_LEN)?;
        let duration = required("duration", &request.duration, MAX_SHORT_LEN)?;
        let quantity = u32::try_from(request.quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| ConsultationError::Validation("quantity must be greater than 0".to_string()))?;
        let route = defaulted("route", request.route, DEFAULT_ROUTE)?;
        let unit = defaulted("unit", request.unit, DEFAULT_UNIT)?;
        if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
            if end < start {
                return Err(ConsultationError::Validation(
                    "end_date cannot be before start_date".to_string(),
                ));
            }
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO prescriptions (id, consultation_id, medication_name, generic_name, concentration,
                                        pharmaceutical_form, dose, frequency, route, duration, quantity, unit,
                                        instructions, status, start_date, end_date, is_chronic,
                                        requires_monitoring, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
            params![
                id,
                consultation_id,
                medication_name,
                trimmed(request.generic_name),
                trimmed(request.concentration),
                trimmed(request.pharmaceutical_form),
                dose,
                frequency,
                route,
                duration,
                quantity,
                unit,
                trimmed(request.instructions),
                PrescriptionStatus::Active.as_str(),
                request.start_date,
                request.end_date,
                request.is_chronic,
                request.requires_monitoring,
                now,
            ],
        )?;

        let prescription = Self::get_prescription(conn, id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Create, EntityType::Prescription, id)
                .with_user(actor.id)
                .with_new(&prescription)
                .with_client(client),
        );

        info!("Prescription {} added to consultation {}", id, consultation_id);
        Ok(prescription)
    }

    pub fn get_prescription(conn: &Connection, prescription_id: Uuid) -> Result<Prescription, ConsultationError> {
        conn.query_row(
            "SELECT * FROM prescriptions WHERE id = ?1",
            [prescription_id],
            map_prescription,
        )
        .optional()?
        .ok_or(ConsultationError::PrescriptionNotFound)
    }

    pub fn list_for_consultation(
        conn: &Connection,
        consultation_id: Uuid,
    ) -> Result<Vec<Prescription>, ConsultationError> {
        let mut stmt = conn.prepare(
            "SELECT * FROM prescriptions WHERE consultation_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let prescriptions = stmt
            .query_map([consultation_id], map_prescription)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prescriptions)
    }

    /// Doctor of the appointment a prescription ultimately belongs to.
    pub fn owning_doctor(conn: &Connection, prescription_id: Uuid) -> Result<Uuid, ConsultationError> {
        conn.query_row(
            "SELECT a.doctor_id FROM prescriptions p
             JOIN consultations c ON c.id = p.consultation_id
             JOIN appointments a ON a.id = c.appointment_id
             WHERE p.id = ?1",
            [prescription_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(ConsultationError::PrescriptionNotFound)
    }

    /// Only active prescriptions move, and only to `completed` or `cancelled`.
    pub fn update_status(
        conn: &Connection,
        prescription_id: Uuid,
        status: PrescriptionStatus,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Prescription, ConsultationError> {
        let old = Self::get_prescription(conn, prescription_id)?;
        if old.status.is_terminal() {
            warn!("Prescription {} is already {}", prescription_id, old.status);
            return Err(ConsultationError::InvalidTransition(format!(
                "Cannot change the status of a {} prescription",
                old.status
            )));
        }
        if !status.is_terminal() {
            return Err(ConsultationError::InvalidTransition(
                "Prescription is already active".to_string(),
            ));
        }

        conn.execute(
            "UPDATE prescriptions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), prescription_id],
        )?;

        let updated = Self::get_prescription(conn, prescription_id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Update, EntityType::Prescription, prescription_id)
                .with_user(actor.id)
                .with_old(&old)
                .with_new(&updated)
                .with_context(AuditContext::PrescriptionStatus {
                    status: status.to_string(),
                })
                .with_client(client),
        );

        info!("Prescription {} marked {}", prescription_id, status);
        Ok(updated)
    }
}

fn required(field: &str, value: &str, max_len: usize) -> Result<String, ConsultationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConsultationError::Validation(format!("{} is required", field)));
    }
    if value.chars().count() > max_len {
        return Err(ConsultationError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(value.to_string())
}

fn defaulted(field: &str, value: Option<String>, default: &str) -> Result<String, ConsultationError> {
    match trimmed(value) {
        Some(v) => required(field, &v, MAX_SHORT_LEN),
        None => Ok(default.to_string()),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn map_prescription(row: &Row<'_>) -> rusqlite::Result<Prescription> {
    Ok(Prescription {
        id: row.get("id")?,
        consultation_id: row.get("consultation_id")?,
        medication_name: row.get("medication_name")?,
        generic_name: row.get("generic_name")?,
        concentration: row.get("concentration")?,
        pharmaceutical_form: row.get("pharmaceutical_form")?,
        dose: row.get("dose")?,
        frequency: row.get("frequency")?,
        route: row.get("route")?,
        duration: row.get("duration")?,
        quantity: row.get("quantity")?,
        unit: row.get("unit")?,
        instructions: row.get("instructions")?,
        status: parse_column(row, "status")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        is_chronic: row.get("is_chronic")?,
        requires_monitoring: row.get("requires_monitoring")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
