use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::{AppointmentBookingService, AppointmentStatus};
use security_cell::{AuditAction, AuditEntry, AuditService, EntityType};
use shared_models::auth::AuthUser;
use shared_utils::extractor::ClientInfo;

use crate::models::{Consultation, ConsultationError, ConsultationFields, RecordConsultationRequest};

static ICD10_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][0-9]{2}(\.[0-9A-Z]{1,4})?$").expect("valid ICD-10 regex")
});

const MAX_DIAGNOSIS_LEN: usize = 200;

pub struct ConsultationService;

impl ConsultationService {
    pub fn record_consultation(
        conn: &Connection,
        request: RecordConsultationRequest,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Consultation, ConsultationError> {
        debug!("Recording consultation for appointment {}", request.appointment_id);

        let appointment = AppointmentBookingService::get_appointment(conn, request.appointment_id)?;
        if appointment.status != AppointmentStatus::Attended {
            warn!(
                "Consultation rejected for appointment {} in status {}",
                appointment.id, appointment.status
            );
            return Err(ConsultationError::AppointmentNotAttended);
        }
        if Self::find_by_appointment(conn, appointment.id)?.is_some() {
            return Err(ConsultationError::AlreadyRecorded);
        }

        let now = Utc::now();
        let mut consultation = Consultation {
            id: Uuid::new_v4(),
            appointment_id: appointment.id,
            weight_kg: None,
            height_cm: None,
            bmi: None,
            blood_pressure_systolic: None,
            blood_pressure_diastolic: None,
            heart_rate: None,
            respiratory_rate: None,
            temperature_c: None,
            oxygen_saturation: None,
            chief_complaint: None,
            current_illness: None,
            medical_history: None,
            allergies: None,
            current_medications: None,
            physical_examination: None,
            primary_diagnosis: None,
            primary_diagnosis_code: None,
            secondary_diagnoses: Vec::new(),
            treatment_plan: None,
            recommendations: None,
            notes: None,
            next_appointment_date: None,
            created_by: Some(actor.id),
            created_at: now,
            updated_at: now,
        };
        apply_fields(&mut consultation, request.fields)?;

        conn.execute(
            "INSERT INTO consultations (id, appointment_id, weight_kg, height_cm, bmi, blood_pressure_systolic,
                                        blood_pressure_diastolic, heart_rate, respiratory_rate, temperature_c,
                                        oxygen_saturation, chief_complaint, current_illness, medical_history,
                                        allergies, current_medications, physical_examination, primary_diagnosis,
                                        primary_diagnosis_code, secondary_diagnoses, treatment_plan, recommendations,
                                        notes, next_appointment_date, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                     ?21, ?22, ?23, ?24, ?25, ?26, ?26)",
            params![
                consultation.id,
                consultation.appointment_id,
                consultation.weight_kg,
                consultation.height_cm,
                consultation.bmi,
                consultation.blood_pressure_systolic,
                consultation.blood_pressure_diastolic,
                consultation.heart_rate,
                consultation.respiratory_rate,
                consultation.temperature_c,
                consultation.oxygen_saturation,
                consultation.chief_complaint,
                consultation.current_illness,
                consultation.medical_history,
                consultation.allergies,
                consultation.current_medications,
                consultation.physical_examination,
                consultation.primary_diagnosis,
                consultation.primary_diagnosis_code,
                diagnoses_json(&consultation.secondary_diagnoses),
                consultation.treatment_plan,
                consultation.recommendations,
                consultation.notes,
                consultation.next_appointment_date,
                consultation.created_by,
                now,
            ],
        )?;

        let consultation = Self::get_consultation(conn, consultation.id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Create, EntityType::Consultation, consultation.id)
                .with_user(actor.id)
                .with_new(&consultation)
                .with_client(client),
        );

        info!(
            "Consultation {} recorded for appointment {}",
            consultation.id, consultation.appointment_id
        );
        Ok(consultation)
    }

    pub fn get_consultation(conn: &Connection, consultation_id: Uuid) -> Result<Consultation, ConsultationError> {
        conn.query_row(
            "SELECT * FROM consultations WHERE id = ?1",
            [consultation_id],
            map_consultation,
        )
        .optional()?
        .ok_or(ConsultationError::NotFound)
    }

    pub fn find_by_appointment(
        conn: &Connection,
        appointment_id: Uuid,
    ) -> Result<Option<Consultation>, ConsultationError> {
        let consultation = conn
            .query_row(
                "SELECT * FROM consultations WHERE appointment_id = ?1",
                [appointment_id],
                map_consultation,
            )
            .optional()?;
        Ok(consultation)
    }

    /// Doctor of the appointment a consultation belongs to.
    pub fn owning_doctor(conn: &Connection, consultation_id: Uuid) -> Result<Uuid, ConsultationError> {
        conn.query_row(
            "SELECT a.doctor_id FROM consultations c
             JOIN appointments a ON a.id = c.appointment_id
             WHERE c.id = ?1",
            [consultation_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(ConsultationError::NotFound)
    }

    /// Apply a partial update; BMI is recomputed from the merged weight and height.
    pub fn update_consultation(
        conn: &Connection,
        consultation_id: Uuid,
        fields: ConsultationFields,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Consultation, ConsultationError> {
        let old = Self::get_consultation(conn, consultation_id)?;
        let mut updated = old.clone();
        apply_fields(&mut updated, fields)?;

        conn.execute(
            "UPDATE consultations SET weight_kg = ?1, height_cm = ?2, bmi = ?3, blood_pressure_systolic = ?4,
                    blood_pressure_diastolic = ?5, heart_rate = ?6, respiratory_rate = ?7, temperature_c = ?8,
                    oxygen_saturation = ?9, chief_complaint = ?10, current_illness = ?11, medical_history = ?12,
                    allergies = ?13, current_medications = ?14, physical_examination = ?15,
                    primary_diagnosis = ?16, primary_diagnosis_code = ?17, secondary_diagnoses = ?18,
                    treatment_plan = ?19, recommendations = ?20, notes = ?21, next_appointment_date = ?22,
                    updated_at = ?23
             WHERE id = ?24",
            params![
                updated.weight_kg,
                updated.height_cm,
                updated.bmi,
                updated.blood_pressure_systolic,
                updated.blood_pressure_diastolic,
                updated.heart_rate,
                updated.respiratory_rate,
                updated.temperature_c,
                updated.oxygen_saturation,
                updated.chief_complaint,
                updated.current_illness,
                updated.medical_history,
                updated.allergies,
                updated.current_medications,
                updated.physical_examination,
                updated.primary_diagnosis,
                updated.primary_diagnosis_code,
                diagnoses_json(&updated.secondary_diagnoses),
                updated.treatment_plan,
                updated.recommendations,
                updated.notes,
                updated.next_appointment_date,
                Utc::now(),
                consultation_id,
            ],
        )?;

        let updated = Self::get_consultation(conn, consultation_id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Update, EntityType::Consultation, consultation_id)
                .with_user(actor.id)
                .with_old(&old)
                .with_new(&updated)
                .with_client(client),
        );

        info!("Consultation {} updated", consultation_id);
        Ok(updated)
    }
}

/// `weight / height_m^2`, rounded to two decimals.
pub fn compute_bmi(weight_kg: Option<f64>, height_cm: Option<f64>) -> Option<f64> {
    match (weight_kg, height_cm) {
        (Some(weight), Some(height)) if weight > 0.0 && height > 0.0 => {
            let meters = height / 100.0;
            Some((weight / (meters * meters) * 100.0).round() / 100.0)
        }
        _ => None,
    }
}

fn apply_fields(consultation: &mut Consultation, fields: ConsultationFields) -> Result<(), ConsultationError> {
    if fields.weight_kg.is_some() {
        consultation.weight_kg = checked_range("weight_kg", fields.weight_kg, 0.5, 500.0)?;
    }
    if fields.height_cm.is_some() {
        consultation.height_cm = checked_range("height_cm", fields.height_cm, 20.0, 300.0)?;
    }
    if fields.blood_pressure_systolic.is_some() {
        consultation.blood_pressure_systolic =
            checked_range("blood_pressure_systolic", fields.blood_pressure_systolic, 50, 300)?;
    }
    if fields.blood_pressure_diastolic.is_some() {
        consultation.blood_pressure_diastolic =
            checked_range("blood_pressure_diastolic", fields.blood_pressure_diastolic, 30, 200)?;
    }
    if let (Some(systolic), Some(diastolic)) =
        (consultation.blood_pressure_systolic, consultation.blood_pressure_diastolic)
    {
        if diastolic >= systolic {
            return Err(ConsultationError::Validation(
                "Diastolic pressure must be lower than systolic pressure".to_string(),
            ));
        }
    }
    if fields.heart_rate.is_some() {
        consultation.heart_rate = checked_range("heart_rate", fields.heart_rate, 20, 300)?;
    }
    if fields.respiratory_rate.is_some() {
        consultation.respiratory_rate = checked_range("respiratory_rate", fields.respiratory_rate, 5, 80)?;
    }
    if fields.temperature_c.is_some() {
        consultation.temperature_c = checked_range("temperature_c", fields.temperature_c, 30.0, 45.0)?;
    }
    if fields.oxygen_saturation.is_some() {
        consultation.oxygen_saturation =
            checked_range("oxygen_saturation", fields.oxygen_saturation, 0, 100)?;
    }

    set_text(&mut consultation.chief_complaint, fields.chief_complaint);
    set_text(&mut consultation.current_illness, fields.current_illness);
    set_text(&mut consultation.medical_history, fields.medical_history);
    set_text(&mut consultation.allergies, fields.allergies);
    set_text(&mut consultation.current_medications, fields.current_medications);
    set_text(&mut consultation.physical_examination, fields.physical_examination);
    set_text(&mut consultation.treatment_plan, fields.treatment_plan);
    set_text(&mut consultation.recommendations, fields.recommendations);
    set_text(&mut consultation.notes, fields.notes);

    if let Some(diagnosis) = fields.primary_diagnosis {
        if diagnosis.chars().count() > MAX_DIAGNOSIS_LEN {
            return Err(ConsultationError::Validation(format!(
                "primary_diagnosis must be at most {} characters",
                MAX_DIAGNOSIS_LEN
            )));
        }
        set_text(&mut consultation.primary_diagnosis, Some(diagnosis));
    }
    if let Some(code) = fields.primary_diagnosis_code {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            consultation.primary_diagnosis_code = None;
        } else if ICD10_REGEX.is_match(&code) {
            consultation.primary_diagnosis_code = Some(code);
        } else {
            return Err(ConsultationError::Validation(format!(
                "Invalid ICD-10 code: {}",
                code
            )));
        }
    }
    if let Some(diagnoses) = fields.secondary_diagnoses {
        consultation.secondary_diagnoses = diagnoses
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
    }
    if fields.next_appointment_date.is_some() {
        consultation.next_appointment_date = fields.next_appointment_date;
    }

    consultation.bmi = compute_bmi(consultation.weight_kg, consultation.height_cm);
    Ok(())
}

fn checked_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<Option<T>, ConsultationError>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    match value {
        Some(v) if v < min || v > max => Err(ConsultationError::Validation(format!(
            "{} must be between {} and {}",
            field, min, max
        ))),
        other => Ok(other),
    }
}

/// Blank strings clear the field.
fn set_text(target: &mut Option<String>, value: Option<String>) {
    if let Some(text) = value {
        let text = text.trim();
        *target = (!text.is_empty()).then(|| text.to_string());
    }
}

fn diagnoses_json(diagnoses: &[String]) -> Value {
    serde_json::to_value(diagnoses).unwrap_or(Value::Array(vec![]))
}

fn map_consultation(row: &Row<'_>) -> rusqlite::Result<Consultation> {
    let secondary: Option<Value> = row.get("secondary_diagnoses")?;
    Ok(Consultation {
        id: row.get("id")?,
        appointment_id: row.get("appointment_id")?,
        weight_kg: row.get("weight_kg")?,
        height_cm: row.get("height_cm")?,
        bmi: row.get("bmi")?,
        blood_pressure_systolic: row.get("blood_pressure_systolic")?,
        blood_pressure_diastolic: row.get("blood_pressure_diastolic")?,
        heart_rate: row.get("heart_rate")?,
        respiratory_rate: row.get("respiratory_rate")?,
        temperature_c: row.get("temperature_c")?,
        oxygen_saturation: row.get("oxygen_saturation")?,
        chief_complaint: row.get("chief_complaint")?,
        current_illness: row.get("current_illness")?,
        medical_history: row.get("medical_history")?,
        allergies: row.get("allergies")?,
        current_medications: row.get("current_medications")?,
        physical_examination: row.get("physical_examination")?,
        primary_diagnosis: row.get("primary_diagnosis")?,
        primary_diagnosis_code: row.get("primary_diagnosis_code")?,
        secondary_diagnoses: secondary
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        treatment_plan: row.get("treatment_plan")?,
        recommendations: row.get("recommendations")?,
        notes: row.get("notes")?,
        next_appointment_date: row.get("next_appointment_date")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use appointment_cell::{AppointmentType, NewAppointment};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use patient_cell::{CreatePatientRequest, DocumentType, PatientService};
    use shared_database::Database;
    use shared_utils::test_utils::TestUser;

    /// Doctor plus one appointment in the given status.
    pub(crate) async fn seed_appointment(status: AppointmentStatus) -> (Database, TestUser, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let doctor = TestUser::doctor("doc@clinic.test");
        doctor.insert(&db).await.unwrap();
        let doctor_id = doctor.doctor_id.unwrap();

        let appointment_id = db
            .write(move |conn| {
                let patient = PatientService::register(
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
                .map_err(|e| ConsultationError::Validation(e.to_string()))?;
                let appointment = AppointmentBookingService::insert(
                    conn,
                    NewAppointment {
                        patient_id: patient.id,
                        doctor_id,
                        appointment_type: AppointmentType::MedicalConsultation,
                        date_time: Utc.with_ymd_and_hms(2030, 1, 1, 10, 0, 0).unwrap(),
                        duration_minutes: 30,
                        description: None,
                        status,
                        external_code: None,
                        payment_amount: None,
                        payment_method: None,
                        notes: None,
                    },
                )?;
                Ok::<_, ConsultationError>(appointment.id)
            })
            .await
            .unwrap();

        (db, doctor, appointment_id)
    }

    fn vitals() -> ConsultationFields {
        ConsultationFields {
            weight_kg: Some(70.0),
            height_cm: Some(175.0),
            blood_pressure_systolic: Some(120),
            blood_pressure_diastolic: Some(80),
            primary_diagnosis: Some("Acute pharyngitis".to_string()),
            primary_diagnosis_code: Some("j02.9".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn bmi_rounds_to_two_decimals() {
        assert_eq!(compute_bmi(Some(70.0), Some(175.0)), Some(22.86));
        assert_eq!(compute_bmi(Some(70.0), None), None);
        assert_eq!(compute_bmi(Some(0.0), Some(175.0)), None);
    }

    #[tokio::test]
    async fn records_once_for_attended_appointment() {
        let (db, doctor, appointment_id) = seed_appointment(AppointmentStatus::Attended).await;
        let actor = doctor.to_auth_user();

        let (first, second) = db
            .write(move |conn| {
                let request = RecordConsultationRequest { appointment_id, fields: vitals() };
                let first = ConsultationService::record_consultation(
                    conn,
                    request.clone(),
                    &actor,
                    &ClientInfo::default(),
                )?;
                let second =
                    ConsultationService::record_consultation(conn, request, &actor, &ClientInfo::default());
                Ok::<_, ConsultationError>((first, second))
            })
            .await
            .unwrap();

        assert_eq!(first.bmi, Some(22.86));
        assert_eq!(first.blood_pressure().as_deref(), Some("120/80"));
        assert_eq!(first.primary_diagnosis_code.as_deref(), Some("J02.9"));
        assert_matches!(second, Err(ConsultationError::AlreadyRecorded));
    }

    #[tokio::test]
    async fn pending_appointment_cannot_get_a_consultation() {
        let (db, doctor, appointment_id) = seed_appointment(AppointmentStatus::Pending).await;
        let actor = doctor.to_auth_user();

        let result = db
            .write(move |conn| {
                ConsultationService::record_consultation(
                    conn,
                    RecordConsultationRequest { appointment_id, fields: vitals() },
                    &actor,
                    &ClientInfo::default(),
                )
            })
            .await;

        assert_matches!(result, Err(ConsultationError::AppointmentNotAttended));
    }

    #[tokio::test]
    async fn update_recomputes_bmi_and_rejects_bad_vitals() {
        let (db, doctor, appointment_id) = seed_appointment(AppointmentStatus::Attended).await;
        let actor = doctor.to_auth_user();

        let (updated, invalid) = db
            .write(move |conn| {
                let recorded = ConsultationService::record_consultation(
                    conn,
                    RecordConsultationRequest { appointment_id, fields: vitals() },
                    &actor,
                    &ClientInfo::default(),
                )?;
                let updated = ConsultationService::update_consultation(
                    conn,
                    recorded.id,
                    ConsultationFields { weight_kg: Some(95.0), ..Default::default() },
                    &actor,
                    &ClientInfo::default(),
                )?;
                let invalid = ConsultationService::update_consultation(
                    conn,
                    recorded.id,
                    ConsultationFields { blood_pressure_diastolic: Some(130), ..Default::default() },
                    &actor,
                    &ClientInfo::default(),
                );
                Ok::<_, ConsultationError>((updated, invalid))
            })
            .await
            .unwrap();

        assert_eq!(updated.bmi, Some(31.02));
        assert_eq!(updated.height_cm, Some(175.0));
        assert_eq!(updated.primary_diagnosis.as_deref(), Some("Acute pharyngitis"));
        assert_matches!(invalid, Err(ConsultationError::Validation(_)));
    }
}
