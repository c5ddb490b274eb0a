use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use doctor_cell::DoctorService;
use patient_cell::PatientService;
use security_cell::{AuditAction, AuditContext, AuditEntry, AuditService, EntityType};
use shared_database::parse_column;
use shared_models::auth::AuthUser;
use shared_utils::extractor::ClientInfo;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CreateAppointmentRequest, NewAppointment,
    SchedulingRules, UpdateAppointmentRequest, DEFAULT_DURATION_MINUTES, MAX_DESCRIPTION_LEN,
    MAX_DURATION_MINUTES, MIN_DURATION_MINUTES,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;

pub(crate) const APPOINTMENT_SELECT: &str = "SELECT a.*,
            p.first_name || ' ' || p.paternal_surname || COALESCE(' ' || p.maternal_surname, '') AS patient_name,
            'Dr. ' || u.first_name || ' ' || u.last_name AS doctor_name
     FROM appointments a
     JOIN patients p ON p.id = a.patient_id
     JOIN doctors d ON d.id = a.doctor_id
     JOIN users u ON u.id = d.user_id";

const DEFAULT_CANCEL_NOTE: &str = "Appointment cancelled";

/// Payment and status changes pushed by the billing system.
#[derive(Debug, Clone, Default)]
pub struct BillingUpdate {
    pub status: Option<AppointmentStatus>,
    pub payment_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub note: Option<String>,
}

pub struct AppointmentBookingService;

impl AppointmentBookingService {
    /// Insert an already-validated appointment. No checks, no audit.
    pub fn insert(conn: &Connection, new: NewAppointment) -> Result<Appointment, AppointmentError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO appointments (id, patient_id, doctor_id, appointment_type, date_time, duration_minutes,
                                       description, status, external_code, payment_amount, payment_method, notes,
                                       is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13)",
            params![
                id,
                new.patient_id,
                new.doctor_id,
                new.appointment_type.as_str(),
                new.date_time.trunc_subsecs(0),
                new.duration_minutes,
                new.description,
                new.status.as_str(),
                new.external_code,
                new.payment_amount,
                new.payment_method,
                new.notes,
                now,
            ],
        )?;
        Self::get_appointment(conn, id)
    }

    pub fn create_appointment(
        conn: &Connection,
        request: CreateAppointmentRequest,
        rules: &SchedulingRules,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Appointment, AppointmentError> {
        debug!(
            "Creating appointment for patient {} with doctor {}",
            request.patient_id, request.doctor_id
        );

        let date_time = ensure_future(request.date_time)?;
        let duration_minutes = validate_duration(request.duration_minutes)?;
        let description = validate_description(request.description)?;
        let payment_amount = normalize_payment(request.payment_amount)?;

        PatientService::get_patient(conn, request.patient_id)?;
        DoctorService::ensure_active(conn, request.doctor_id)?;
        ConflictDetectionService::ensure_available(
            conn,
            request.doctor_id,
            date_time,
            rules.window_for(request.duration_minutes),
            None,
        )?;

        let appointment = Self::insert(
            conn,
            NewAppointment {
                patient_id: request.patient_id,
                doctor_id: request.doctor_id,
                appointment_type: request.appointment_type,
                date_time,
                duration_minutes,
                description,
                status: AppointmentLifecycleService::initial_status(payment_amount),
                external_code: None,
                payment_amount,
                payment_method: non_empty(request.payment_method),
                notes: non_empty(request.notes),
            },
        )?;

        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Create, EntityType::Appointment, appointment.id)
                .with_user(actor.id)
                .with_new(&appointment)
                .with_client(client),
        );

        info!("Appointment {} created for {}", appointment.id, appointment.date_time);
        Ok(appointment)
    }

    pub fn get_appointment(conn: &Connection, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        conn.query_row(
            &format!("{APPOINTMENT_SELECT} WHERE a.id = ?1 AND a.is_active = 1"),
            [appointment_id],
            map_appointment,
        )
        .optional()?
        .ok_or(AppointmentError::NotFound)
    }

    pub fn find_by_external_code(
        conn: &Connection,
        external_code: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let appointment = conn
            .query_row(
                &format!("{APPOINTMENT_SELECT} WHERE a.external_code = ?1 AND a.is_active = 1"),
                [external_code],
                map_appointment,
            )
            .optional()?;
        Ok(appointment)
    }

    pub fn update_appointment(
        conn: &Connection,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        rules: &SchedulingRules,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Appointment, AppointmentError> {
        let old = Self::get_appointment(conn, appointment_id)?;
        AppointmentLifecycleService::validate_update(old.status, request.status)?;

        let mut updated = old.clone();
        if let Some(date_time) = request.date_time {
            updated.date_time = ensure_future(date_time)?;
        }
        if request.duration_minutes.is_some() {
            updated.duration_minutes = validate_duration(request.duration_minutes)?;
        }
        if let Some(doctor_id) = request.doctor_id {
            if doctor_id != old.doctor_id {
                DoctorService::ensure_active(conn, doctor_id)?;
            }
            updated.doctor_id = doctor_id;
        }
        if let Some(kind) = request.appointment_type {
            updated.appointment_type = kind;
        }
        if request.description.is_some() {
            updated.description = validate_description(request.description)?;
        }
        if let Some(status) = request.status {
            updated.status = status;
        }
        if request.payment_amount.is_some() {
            updated.payment_amount = normalize_payment(request.payment_amount)?;
        }
        if request.payment_method.is_some() {
            updated.payment_method = non_empty(request.payment_method);
        }
        if request.notes.is_some() {
            updated.notes = non_empty(request.notes);
        }

        let rescheduled = updated.date_time != old.date_time
            || updated.duration_minutes != old.duration_minutes
            || updated.doctor_id != old.doctor_id;
        if rescheduled {
            ConflictDetectionService::ensure_available(
                conn,
                updated.doctor_id,
                updated.date_time,
                rules.window_for(Some(updated.duration_minutes)),
                Some(appointment_id),
            )?;
        }

        conn.execute(
            "UPDATE appointments SET doctor_id = ?1, appointment_type = ?2, date_time = ?3, duration_minutes = ?4,
                    description = ?5, status = ?6, payment_amount = ?7, payment_method = ?8, notes = ?9,
                    updated_at = ?10
             WHERE id = ?11",
            params![
                updated.doctor_id,
                updated.appointment_type.as_str(),
                updated.date_time,
                updated.duration_minutes,
                updated.description,
                updated.status.as_str(),
                updated.payment_amount,
                updated.payment_method,
                updated.notes,
                Utc::now(),
                appointment_id,
            ],
        )?;

        let updated = Self::get_appointment(conn, appointment_id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Update, EntityType::Appointment, appointment_id)
                .with_user(actor.id)
                .with_old(&old)
                .with_new(&updated)
                .with_client(client),
        );

        info!("Appointment {} updated", appointment_id);
        Ok(updated)
    }

    pub fn cancel_appointment(
        conn: &Connection,
        appointment_id: Uuid,
        reason: Option<String>,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Appointment, AppointmentError> {
        let old = Self::get_appointment(conn, appointment_id)?;
        AppointmentLifecycleService::validate_cancel(old.status)?;

        let reason = non_empty(reason);
        let notes = reason.clone().unwrap_or_else(|| DEFAULT_CANCEL_NOTE.to_string());
        Self::set_status(conn, appointment_id, AppointmentStatus::Cancelled, Some(&notes))?;

        let cancelled = Self::get_appointment(conn, appointment_id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Update, EntityType::Appointment, appointment_id)
                .with_user(actor.id)
                .with_old(&old)
                .with_new(&cancelled)
                .with_context(AuditContext::Cancellation { reason })
                .with_client(client),
        );

        info!("Appointment {} cancelled", appointment_id);
        Ok(cancelled)
    }

    pub fn mark_attended(
        conn: &Connection,
        appointment_id: Uuid,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Appointment, AppointmentError> {
        let old = Self::get_appointment(conn, appointment_id)?;
        AppointmentLifecycleService::validate_attend(old.status)?;

        Self::set_status(conn, appointment_id, AppointmentStatus::Attended, None)?;

        let attended = Self::get_appointment(conn, appointment_id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Update, EntityType::Appointment, appointment_id)
                .with_user(actor.id)
                .with_old(&old)
                .with_new(&attended)
                .with_context(AuditContext::MarkAttended)
                .with_client(client),
        );

        info!("Appointment {} marked as attended", appointment_id);
        Ok(attended)
    }

    /// Apply a billing-side change. The note, if any, is appended to the
    /// existing notes on its own line.
    pub fn apply_billing_update(
        conn: &Connection,
        appointment_id: Uuid,
        update: BillingUpdate,
    ) -> Result<Appointment, AppointmentError> {
        let current = Self::get_appointment(conn, appointment_id)?;
        let payment_amount = match update.payment_amount {
            Some(amount) => normalize_payment(Some(amount))?,
            None => current.payment_amount,
        };
        let notes = match (current.notes, non_empty(update.note)) {
            (Some(existing), Some(note)) => Some(format!("{}\n{}", existing, note)),
            (existing, note) => note.or(existing),
        };

        conn.execute(
            "UPDATE appointments SET status = ?1, payment_amount = ?2, payment_method = ?3, notes = ?4,
                    updated_at = ?5
             WHERE id = ?6",
            params![
                update.status.unwrap_or(current.status).as_str(),
                payment_amount,
                non_empty(update.payment_method).or(current.payment_method),
                notes,
                Utc::now(),
                appointment_id,
            ],
        )?;
        Self::get_appointment(conn, appointment_id)
    }

    fn set_status(
        conn: &Connection,
        appointment_id: Uuid,
        status: AppointmentStatus,
        notes: Option<&str>,
    ) -> Result<(), AppointmentError> {
        conn.execute(
            "UPDATE appointments SET status = ?1, notes = COALESCE(?2, notes), updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), notes, Utc::now(), appointment_id],
        )?;
        Ok(())
    }
}

/// Truncates to whole seconds and rejects instants already past.
pub fn ensure_future(date_time: DateTime<Utc>) -> Result<DateTime<Utc>, AppointmentError> {
    let date_time = date_time.trunc_subsecs(0);
    if date_time < Utc::now() {
        return Err(AppointmentError::PastDate);
    }
    Ok(date_time)
}

pub fn validate_duration(duration: Option<u32>) -> Result<u32, AppointmentError> {
    let duration = duration.unwrap_or(DEFAULT_DURATION_MINUTES);
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration) {
        return Err(AppointmentError::Validation(format!(
            "duration_minutes must be between {} and {}",
            MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
        )));
    }
    Ok(duration)
}

pub fn validate_description(description: Option<String>) -> Result<Option<String>, AppointmentError> {
    let description = non_empty(description);
    if description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(AppointmentError::Validation(format!(
            "description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(description)
}

/// Non-negative amount rounded to cents.
pub fn normalize_payment(amount: Option<f64>) -> Result<Option<f64>, AppointmentError> {
    match amount {
        Some(value) if !value.is_finite() || value < 0.0 => Err(AppointmentError::Validation(
            "payment_amount must be zero or positive".to_string(),
        )),
        Some(value) => Ok(Some((value * 100.0).round() / 100.0)),
        None => Ok(None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn map_appointment(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get("id")?,
        patient_id: row.get("patient_id")?,
        doctor_id: row.get("doctor_id")?,
        patient_name: row.get("patient_name")?,
        doctor_name: row.get("doctor_name")?,
        appointment_type: parse_column(row, "appointment_type")?,
        date_time: row.get("date_time")?,
        duration_minutes: row.get("duration_minutes")?,
        description: row.get("description")?,
        status: parse_column(row, "status")?,
        external_code: row.get("external_code")?,
        payment_amount: row.get("payment_amount")?,
        payment_method: row.get("payment_method")?,
        notes: row.get("notes")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
