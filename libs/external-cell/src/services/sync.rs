use chrono::SubsecRound;
use rusqlite::{params, Connection};
use tracing::{debug, info, instrument, warn};

use appointment_cell::services::booking::{normalize_payment, validate_description, validate_duration};
use appointment_cell::services::schedule::day_bounds;
use appointment_cell::{
    Appointment, AppointmentBookingService, AppointmentError, AppointmentStatus, AppointmentType,
    BillingUpdate, ConflictDetectionService, NewAppointment, SchedulingRules,
};
use doctor_cell::DoctorService;
use patient_cell::{validate_document, CreatePatientRequest, DocumentType, Patient, PatientService};
use security_cell::{AuditAction, AuditContext, AuditEntry, AuditService, EntityType};
use shared_utils::extractor::ClientInfo;

use crate::models::{
    ExternalError, PaymentStatusRequest, SplitName, SyncAction, SyncAppointmentRequest, SyncOutcome,
    SyncPeriod, SyncStats, SyncStatsQuery, SyncStatus, BILLING_PATIENT_PREFIX, BILLING_PAYMENT_METHOD,
    MAX_EXTERNAL_CODE_LEN, MAX_NAMES_LEN, MISSING_SURNAME,
};

const SYNC_DESCRIPTION: &str = "Appointment synced from billing system";
const SYNC_NOTE: &str = "Created automatically by billing system sync";

/// Reconciles clinic appointments with the billing system. Every write is
/// audited without a user and with a billing context.
pub struct BillingSyncService;

impl BillingSyncService {
    #[instrument(skip(conn, request, rules, client), fields(external_code = %request.appointment.external_code))]
    pub fn sync_appointment(
        conn: &Connection,
        request: SyncAppointmentRequest,
        rules: &SchedulingRules,
        client: &ClientInfo,
    ) -> Result<SyncOutcome, ExternalError> {
        let SyncAppointmentRequest { patient: identity, appointment } = request;
        let dni = identity.dni.trim().to_string();
        validate_document(DocumentType::Dni, &dni)?;
        let external_code = appointment.external_code.trim().to_string();
        if external_code.is_empty() || external_code.chars().count() > MAX_EXTERNAL_CODE_LEN {
            return Err(ExternalError::Validation(format!(
                "external_code must be between 1 and {} characters",
                MAX_EXTERNAL_CODE_LEN
            )));
        }
        if identity.names.trim().is_empty() || identity.names.chars().count() > MAX_NAMES_LEN {
            return Err(ExternalError::Validation(format!(
                "names must be between 1 and {} characters",
                MAX_NAMES_LEN
            )));
        }
        let status = appointment.status.unwrap_or(AppointmentStatus::Pending);

        if let Some(existing) = AppointmentBookingService::find_by_external_code(conn, &external_code)? {
            if existing.status == status {
                debug!("Appointment {} already in sync", existing.id);
                return Ok(SyncOutcome {
                    action: SyncAction::NoChange,
                    appointment_id: existing.id,
                    patient_id: existing.patient_id,
                    patient_created: false,
                });
            }

            let updated = AppointmentBookingService::apply_billing_update(
                conn,
                existing.id,
                BillingUpdate {
                    status: Some(status),
                    payment_amount: appointment.price,
                    payment_method: paid_method(status),
                    note: None,
                },
            )?;
            AuditService::record(
                conn,
                AuditEntry::new(AuditAction::SyncUpdate, EntityType::Appointment, existing.id)
                    .with_old(&existing)
                    .with_new(&updated)
                    .with_context(AuditContext::BillingSync {
                        external_code: external_code.clone(),
                        sync_type: "update".to_string(),
                        patient_created: false,
                    })
                    .with_client(client),
            );

            info!("Appointment {} updated from billing: {} -> {}", existing.id, existing.status, status);
            return Ok(SyncOutcome {
                action: SyncAction::Updated,
                appointment_id: updated.id,
                patient_id: updated.patient_id,
                patient_created: false,
            });
        }

        DoctorService::ensure_active(conn, appointment.doctor_id).map_err(AppointmentError::from)?;
        let duration_minutes = validate_duration(appointment.duration_minutes)?;
        let date_time = appointment.date_time.trunc_subsecs(0);
        ConflictDetectionService::ensure_available(
            conn,
            appointment.doctor_id,
            date_time,
            rules.window_for(appointment.duration_minutes),
            None,
        )?;
        let description = validate_description(appointment.description)?
            .unwrap_or_else(|| SYNC_DESCRIPTION.to_string());
        let payment_amount = normalize_payment(appointment.price)?;

        let (patient, patient_created) = match PatientService::find_by_document(conn, DocumentType::Dni, &dni)? {
            Some(found) => (found, false),
            None => {
                let name = split_names(&identity.names);
                let created = PatientService::register(
                    conn,
                    CreatePatientRequest {
                        document_type: DocumentType::Dni,
                        document_number: dni.clone(),
                        first_name: name.first_name,
                        paternal_surname: name.paternal_surname,
                        maternal_surname: name.maternal_surname,
                        history_number: None,
                        external_code: Some(format!("{}{}", BILLING_PATIENT_PREFIX, dni)),
                        birth_date: identity.birth_date,
                        gender: identity.gender,
                        email: identity.email,
                        phone: identity.phone,
                        address: None,
                        emergency_contact_name: None,
                        emergency_contact_phone: None,
                    },
                )?;
                audit_patient_from_sync(conn, &created, client);
                (created, true)
            }
        };

        let created = AppointmentBookingService::insert(
            conn,
            NewAppointment {
                patient_id: patient.id,
                doctor_id: appointment.doctor_id,
                appointment_type: appointment
                    .appointment_type
                    .unwrap_or(AppointmentType::MedicalConsultation),
                date_time,
                duration_minutes,
                description: Some(description),
                status,
                external_code: Some(external_code.clone()),
                payment_amount,
                payment_method: paid_method(status),
                notes: Some(SYNC_NOTE.to_string()),
            },
        )?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Create, EntityType::Appointment, created.id)
                .with_new(&created)
                .with_context(AuditContext::BillingSync {
                    external_code,
                    sync_type: "create".to_string(),
                    patient_created,
                })
                .with_client(client),
        );

        info!("Appointment {} created from billing sync", created.id);
        Ok(SyncOutcome {
            action: SyncAction::Created,
            appointment_id: created.id,
            patient_id: patient.id,
            patient_created,
        })
    }

    /// Set status and payment by external code; transaction details are
    /// appended to the notes.
    pub fn update_payment_status(
        conn: &Connection,
        request: PaymentStatusRequest,
        client: &ClientInfo,
    ) -> Result<Appointment, ExternalError> {
        let existing = Self::find_synced(conn, &request.external_code)?;
        if let Some(amount) = request.payment_amount {
            normalize_payment(Some(amount))?;
        }

        let transaction_id = non_blank(request.transaction_id);
        let payment_date = non_blank(request.payment_date);
        let note = [
            transaction_id.as_ref().map(|id| format!("Transaction ID: {}", id)),
            payment_date.as_ref().map(|date| format!("Payment date: {}", date)),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");

        let updated = AppointmentBookingService::apply_billing_update(
            conn,
            existing.id,
            BillingUpdate {
                status: Some(request.status),
                payment_amount: request.payment_amount,
                payment_method: request.payment_method,
                note: Some(note),
            },
        )?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::PaymentUpdate, EntityType::Appointment, existing.id)
                .with_old(&existing)
                .with_new(&updated)
                .with_context(AuditContext::PaymentUpdate {
                    external_code: request.external_code.clone(),
                    transaction_id,
                    payment_date,
                })
                .with_client(client),
        );

        info!("Payment status for {} set to {}", request.external_code, updated.status);
        Ok(updated)
    }

    pub fn sync_status(conn: &Connection, external_code: &str) -> Result<SyncStatus, ExternalError> {
        let appointment = Self::find_synced(conn, external_code)?;
        Ok(SyncStatus {
            appointment_id: appointment.id,
            external_code: external_code.to_string(),
            status: appointment.status,
            date_time: appointment.date_time,
            payment_amount: appointment.payment_amount,
            payment_method: appointment.payment_method,
            patient_id: appointment.patient_id,
            patient_name: appointment.patient_name,
            doctor_id: appointment.doctor_id,
            doctor_name: appointment.doctor_name,
            last_updated: appointment.updated_at,
        })
    }

    /// Counts over records created within the optional clinic-local day range.
    pub fn sync_stats(
        conn: &Connection,
        query: &SyncStatsQuery,
        rules: &SchedulingRules,
    ) -> Result<SyncStats, ExternalError> {
        let from = query
            .date_from
            .map(|d| day_bounds(d, rules.utc_offset_minutes).map(|(start, _)| start))
            .transpose()?;
        let to = query
            .date_to
            .map(|d| day_bounds(d, rules.utc_offset_minutes).map(|(_, end)| end))
            .transpose()?;

        let mut stats = SyncStats {
            period: SyncPeriod {
                from: query.date_from,
                to: query.date_to,
            },
            ..SyncStats::default()
        };

        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM appointments
             WHERE external_code IS NOT NULL AND is_active = 1
               AND (?1 IS NULL OR created_at >= ?1)
               AND (?2 IS NULL OR created_at < ?2)
             GROUP BY status",
        )?;
        let rows = stmt.query_map(params![from, to], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.appointments_by_status.insert(status, count as u64);
        }
        stats.total_synced_appointments = stats.appointments_by_status.values().sum();

        let patients: i64 = conn.query_row(
            "SELECT COUNT(*) FROM patients
             WHERE external_code LIKE ?1 AND is_active = 1
               AND (?2 IS NULL OR created_at >= ?2)
               AND (?3 IS NULL OR created_at < ?3)",
            params![format!("{}%", BILLING_PATIENT_PREFIX), from, to],
            |row| row.get(0),
        )?;
        stats.total_synced_patients = patients as u64;

        Ok(stats)
    }

    fn find_synced(conn: &Connection, external_code: &str) -> Result<Appointment, ExternalError> {
        AppointmentBookingService::find_by_external_code(conn, external_code)?.ok_or_else(|| {
            warn!("No appointment for external code {}", external_code);
            ExternalError::UnknownExternalCode(external_code.to_string())
        })
    }
}

/// Split a full name on whitespace, anchoring surnames at the end:
/// the last two tokens are the paternal and maternal surnames and everything
/// before them is the first name.
pub fn split_names(names: &str) -> SplitName {
    let tokens: Vec<&str> = names.split_whitespace().collect();
    match tokens.as_slice() {
        [] => SplitName {
            first_name: String::new(),
            paternal_surname: MISSING_SURNAME.to_string(),
            maternal_surname: None,
        },
        [first] => SplitName {
            first_name: first.to_string(),
            paternal_surname: MISSING_SURNAME.to_string(),
            maternal_surname: None,
        },
        [first, paternal] => SplitName {
            first_name: first.to_string(),
            paternal_surname: paternal.to_string(),
            maternal_surname: None,
        },
        [given @ .., paternal, maternal] => SplitName {
            first_name: given.join(" "),
            paternal_surname: paternal.to_string(),
            maternal_surname: Some(maternal.to_string()),
        },
    }
}

fn paid_method(status: AppointmentStatus) -> Option<String> {
    (status == AppointmentStatus::Paid).then(|| BILLING_PAYMENT_METHOD.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn audit_patient_from_sync(conn: &Connection, patient: &Patient, client: &ClientInfo) {
    AuditService::record(
        conn,
        AuditEntry::new(AuditAction::Create, EntityType::Patient, patient.id)
            .with_new(patient)
            .with_context(AuditContext::PatientFromSync {
                external_code: patient.external_code.clone().unwrap_or_default(),
            })
            .with_client(client),
    );
}
