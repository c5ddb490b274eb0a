use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use security_cell::{AuditAction, AuditContext, AuditEntry, AuditService, EntityType};
use shared_database::{parse_column, parse_optional_column};
use shared_models::auth::AuthUser;
use shared_models::pagination::{Page, Pagination};
use shared_utils::extractor::ClientInfo;

use crate::models::{
    CreatePatientRequest, DocumentType, Patient, PatientDetail, PatientError, PatientListQuery,
    RecentAppointment, UpdatePatientRequest, HISTORY_NUMBER_PREFIX, MAX_HISTORY_SEQUENCE,
};

static DNI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}$").expect("valid DNI regex"));
static HISTORY_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HCE-\d{6}$").expect("valid history number regex"));
static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

const MAX_DOCUMENT_LEN: usize = 20;
const MAX_NAME_LEN: usize = 100;
const MAX_PHONE_LEN: usize = 20;
const MAX_ADDRESS_LEN: usize = 255;
const MAX_CONTACT_NAME_LEN: usize = 200;
const RECENT_APPOINTMENTS: i64 = 5;

pub struct PatientService;

impl PatientService {
    /// Validate and insert a patient without writing an audit record.
    ///
    /// Callers are expected to audit with whatever context applies to them.
    pub fn register(conn: &Connection, request: CreatePatientRequest) -> Result<Patient, PatientError> {
        let document_number = request.document_number.trim().to_string();
        validate_document(request.document_type, &document_number)?;
        let first_name = required_text("first_name", &request.first_name, MAX_NAME_LEN)?;
        let paternal_surname =
            required_text("paternal_surname", &request.paternal_surname, MAX_NAME_LEN)?;
        let maternal_surname =
            optional_text("maternal_surname", request.maternal_surname, MAX_NAME_LEN)?;
        let email = normalize_email(request.email)?;
        let phone = optional_text("phone", request.phone, MAX_PHONE_LEN)?;
        let address = optional_text("address", request.address, MAX_ADDRESS_LEN)?;
        let emergency_contact_name = optional_text(
            "emergency_contact_name",
            request.emergency_contact_name,
            MAX_CONTACT_NAME_LEN,
        )?;
        let emergency_contact_phone = optional_text(
            "emergency_contact_phone",
            request.emergency_contact_phone,
            MAX_PHONE_LEN,
        )?;

        if Self::find_by_document(conn, request.document_type, &document_number)?.is_some() {
            warn!("Duplicate {} document {}", request.document_type, document_number);
            return Err(PatientError::DocumentTaken);
        }

        let history_number = match request.history_number.map(|h| h.trim().to_string()) {
            Some(number) if !number.is_empty() => {
                if !HISTORY_NUMBER_REGEX.is_match(&number) {
                    return Err(PatientError::Validation(
                        "history_number must look like HCE-000123".to_string(),
                    ));
                }
                if history_number_exists(conn, &number)? {
                    return Err(PatientError::HistoryNumberTaken);
                }
                number
            }
            _ => next_history_number(conn)?,
        };

        let id = Uuid::new_v4();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO patients (id, document_type, document_number, first_name, paternal_surname, maternal_surname,
                                   history_number, external_code, birth_date, gender, email, phone, address,
                                   emergency_contact_name, emergency_contact_phone, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1, ?16, ?16)",
            params![
                id,
                request.document_type.as_str(),
                document_number,
                first_name,
                paternal_surname,
                maternal_surname,
                history_number,
                request.external_code,
                request.birth_date,
                request.gender.map(|g| g.as_str()),
                email,
                phone,
                address,
                emergency_contact_name,
                emergency_contact_phone,
                now,
            ],
        )?;

        info!("Patient {} registered with {}", id, history_number);
        Self::get_patient(conn, id)
    }

    pub fn create_patient(
        conn: &Connection,
        request: CreatePatientRequest,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Patient, PatientError> {
        debug!("Creating patient for user {}", actor.id);

        let patient = Self::register(conn, request)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Create, EntityType::Patient, patient.id)
                .with_user(actor.id)
                .with_new(&patient)
                .with_client(client),
        );
        Ok(patient)
    }

    /// Active patient by id.
    pub fn get_patient(conn: &Connection, patient_id: Uuid) -> Result<Patient, PatientError> {
        conn.query_row(
            "SELECT * FROM patients WHERE id = ?1 AND is_active = 1",
            [patient_id],
            map_patient,
        )
        .optional()?
        .ok_or(PatientError::NotFound)
    }

    pub fn get_detail(conn: &Connection, patient_id: Uuid) -> Result<PatientDetail, PatientError> {
        let patient = Self::get_patient(conn, patient_id)?;

        let mut stmt = conn.prepare(
            "SELECT a.id, a.date_time, a.appointment_type, a.status,
                    u.first_name || ' ' || u.last_name AS doctor_name
             FROM appointments a
             JOIN doctors d ON d.id = a.doctor_id
             JOIN users u ON u.id = d.user_id
             WHERE a.patient_id = ?1 AND a.is_active = 1
             ORDER BY a.date_time DESC
             LIMIT ?2",
        )?;
        let recent_appointments = stmt
            .query_map(params![patient_id, RECENT_APPOINTMENTS], |row| {
                Ok(RecentAppointment {
                    id: row.get("id")?,
                    date_time: row.get("date_time")?,
                    appointment_type: row.get("appointment_type")?,
                    status: row.get("status")?,
                    doctor_name: row.get("doctor_name")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PatientDetail {
            patient: patient.into(),
            recent_appointments,
        })
    }

    pub fn find_by_document(
        conn: &Connection,
        document_type: DocumentType,
        document_number: &str,
    ) -> Result<Option<Patient>, PatientError> {
        let patient = conn
            .query_row(
                "SELECT * FROM patients
                 WHERE document_type = ?1 AND document_number = ?2 AND is_active = 1",
                params![document_type.as_str(), document_number.trim()],
                map_patient,
            )
            .optional()?;
        Ok(patient)
    }

    pub fn list_patients(conn: &Connection, query: &PatientListQuery) -> Result<Page<Patient>, PatientError> {
        let page = query.page_params();
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let document_type = query.document_type.map(|d| d.as_str());
        let gender = query.gender.map(|g| g.as_str());

        let filter = "WHERE is_active = 1
               AND (?1 IS NULL
                    OR LOWER(first_name || ' ' || paternal_surname || ' ' || COALESCE(maternal_surname, '')) LIKE '%' || ?1 || '%'
                    OR document_number LIKE '%' || ?1 || '%'
                    OR LOWER(history_number) LIKE '%' || ?1 || '%')
               AND (?2 IS NULL OR document_type = ?2)
               AND (?3 IS NULL OR gender = ?3)";

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM patients {filter}"),
            params![search, document_type, gender],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM patients {filter}
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?4 OFFSET ?5"
        ))?;
        let items = stmt
            .query_map(
                params![search, document_type, gender, page.limit(), page.offset()],
                map_patient,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            pagination: Pagination::new(&page, total as u64),
        })
    }

    pub fn update_patient(
        conn: &Connection,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Patient, PatientError> {
        let old = Self::get_patient(conn, patient_id)?;
        let mut updated = old.clone();

        if let Some(document_type) = request.document_type {
            updated.document_type = document_type;
        }
        if let Some(number) = request.document_number {
            updated.document_number = number.trim().to_string();
        }
        if updated.document_type != old.document_type || updated.document_number != old.document_number {
            validate_document(updated.document_type, &updated.document_number)?;
            let holder = Self::find_by_document(conn, updated.document_type, &updated.document_number)?;
            if holder.is_some_and(|p| p.id != patient_id) {
                return Err(PatientError::DocumentTaken);
            }
        }

        if let Some(first_name) = request.first_name {
            updated.first_name = required_text("first_name", &first_name, MAX_NAME_LEN)?;
        }
        if let Some(paternal) = request.paternal_surname {
            updated.paternal_surname = required_text("paternal_surname", &paternal, MAX_NAME_LEN)?;
        }
        if request.maternal_surname.is_some() {
            updated.maternal_surname =
                optional_text("maternal_surname", request.maternal_surname, MAX_NAME_LEN)?;
        }
        if request.birth_date.is_some() {
            updated.birth_date = request.birth_date;
        }
        if request.gender.is_some() {
            updated.gender = request.gender;
        }
        if request.email.is_some() {
            updated.email = normalize_email(request.email)?;
        }
        if request.phone.is_some() {
            updated.phone = optional_text("phone", request.phone, MAX_PHONE_LEN)?;
        }
        if request.address.is_some() {
            updated.address = optional_text("address", request.address, MAX_ADDRESS_LEN)?;
        }
        if request.emergency_contact_name.is_some() {
            updated.emergency_contact_name = optional_text(
                "emergency_contact_name",
                request.emergency_contact_name,
                MAX_CONTACT_NAME_LEN,
            )?;
        }
        if request.emergency_contact_phone.is_some() {
            updated.emergency_contact_phone = optional_text(
                "emergency_contact_phone",
                request.emergency_contact_phone,
                MAX_PHONE_LEN,
            )?;
        }

        conn.execute(
            "UPDATE patients SET document_type = ?1, document_number = ?2, first_name = ?3,
                    paternal_surname = ?4, maternal_surname = ?5, birth_date = ?6, gender = ?7,
                    email = ?8, phone = ?9, address = ?10, emergency_contact_name = ?11,
                    emergency_contact_phone = ?12, updated_at = ?13
             WHERE id = ?14",
            params![
                updated.document_type.as_str(),
                updated.document_number,
                updated.first_name,
                updated.paternal_surname,
                updated.maternal_surname,
                updated.birth_date,
                updated.gender.map(|g| g.as_str()),
                updated.email,
                updated.phone,
                updated.address,
                updated.emergency_contact_name,
                updated.emergency_contact_phone,
                Utc::now(),
                patient_id,
            ],
        )?;

        let updated = Self::get_patient(conn, patient_id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Update, EntityType::Patient, patient_id)
                .with_user(actor.id)
                .with_old(&old)
                .with_new(&updated)
                .with_client(client),
        );

        info!("Patient {} updated", patient_id);
        Ok(updated)
    }

    pub fn delete_patient(
        conn: &Connection,
        patient_id: Uuid,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<(), PatientError> {
        let old = Self::get_patient(conn, patient_id)?;
        conn.execute(
            "UPDATE patients SET is_active = 0, updated_at = ?1 WHERE id = ?2",
            params![Utc::now(), patient_id],
        )?;

        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Delete, EntityType::Patient, patient_id)
                .with_user(actor.id)
                .with_old(&old)
                .with_context(AuditContext::SoftDelete)
                .with_client(client),
        );

        info!("Patient {} deactivated", patient_id);
        Ok(())
    }
}

/// Identity documents must be present and bounded; DNIs are exactly 8 digits.
pub fn validate_document(document_type: DocumentType, number: &str) -> Result<(), PatientError> {
    if number.is_empty() || number.chars().count() > MAX_DOCUMENT_LEN {
        return Err(PatientError::Validation(format!(
            "document_number is required and must be at most {} characters",
            MAX_DOCUMENT_LEN
        )));
    }
    if document_type == DocumentType::Dni && !DNI_REGEX.is_match(number) {
        return Err(PatientError::Validation("DNI must be exactly 8 digits".to_string()));
    }
    Ok(())
}

/// One more than the highest well-formed `HCE-` number on file.
pub fn next_history_number(conn: &Connection) -> Result<String, PatientError> {
    let highest: Option<i64> = conn.query_row(
        "SELECT MAX(CAST(SUBSTR(history_number, 5) AS INTEGER))
         FROM patients WHERE history_number GLOB 'HCE-[0-9][0-9][0-9][0-9][0-9][0-9]'",
        [],
        |row| row.get(0),
    )?;
    let next = highest
        .unwrap_or(0)
        .checked_add(1)
        .filter(|next| *next <= MAX_HISTORY_SEQUENCE)
        .ok_or(PatientError::HistoryNumbersExhausted)?;
    Ok(format!("{}{:06}", HISTORY_NUMBER_PREFIX, next))
}

fn history_number_exists(conn: &Connection, number: &str) -> Result<bool, PatientError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM patients WHERE history_number = ?1)",
        [number],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn required_text(field: &str, value: &str, max: usize) -> Result<String, PatientError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PatientError::Validation(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(PatientError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

fn optional_text(field: &str, value: Option<String>, max: usize) -> Result<Option<String>, PatientError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => required_text(field, v, max).map(Some),
    }
}

fn normalize_email(email: Option<String>) -> Result<Option<String>, PatientError> {
    let Some(email) = optional_text("email", email, MAX_CONTACT_NAME_LEN)? else {
        return Ok(None);
    };
    let email = email.to_lowercase();
    if !EMAIL_REGEX.is_match(&email) {
        return Err(PatientError::Validation("Invalid email format".to_string()));
    }
    Ok(Some(email))
}

fn map_patient(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get("id")?,
        document_type: parse_column(row, "document_type")?,
        document_number: row.get("document_number")?,
        first_name: row.get("first_name")?,
        paternal_surname: row.get("paternal_surname")?,
        maternal_surname: row.get("maternal_surname")?,
        history_number: row.get("history_number")?,
        external_code: row.get("external_code")?,
        birth_date: row.get("birth_date")?,
        gender: parse_optional_column(row, "gender")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        address: row.get("address")?,
        emergency_contact_name: row.get("emergency_contact_name")?,
        emergency_contact_phone: row.get("emergency_contact_phone")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_database::Database;
    use shared_utils::test_utils::TestUser;

    use crate::models::Gender;

    fn juan(dni: &str) -> CreatePatientRequest {
        CreatePatientRequest {
            document_type: DocumentType::Dni,
            document_number: dni.to_string(),
            first_name: "Juan".to_string(),
            paternal_surname: "Perez".to_string(),
            maternal_surname: None,
            history_number: None,
            external_code: None,
            birth_date: None,
            gender: Some(Gender::M),
            email: Some("Juan.Perez@Mail.test".to_string()),
            phone: None,
            address: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
        }
    }

    async fn setup() -> (Database, AuthUser) {
        let db = Database::open_in_memory().unwrap();
        let admin = TestUser::admin("admin@clinic.test");
        admin.insert(&db).await.unwrap();
        (db, admin.to_auth_user())
    }

    #[tokio::test]
    async fn history_numbers_increase_sequentially() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            let first = PatientService::create_patient(conn, juan("12345678"), &actor, &client)?;
            let second = PatientService::create_patient(conn, juan("87654321"), &actor, &client)?;
            assert_eq!(first.history_number, "HCE-000001");
            assert_eq!(second.history_number, "HCE-000002");
            assert_eq!(first.email.as_deref(), Some("juan.perez@mail.test"));
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rejects_malformed_dni_and_duplicates() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            assert_matches!(
                PatientService::create_patient(conn, juan("1234567"), &actor, &client),
                Err(PatientError::Validation(_))
            );
            assert_matches!(
                PatientService::create_patient(conn, juan("1234567a"), &actor, &client),
                Err(PatientError::Validation(_))
            );

            PatientService::create_patient(conn, juan("12345678"), &actor, &client)?;
            assert_matches!(
                PatientService::create_patient(conn, juan("12345678"), &actor, &client),
                Err(PatientError::DocumentTaken)
            );

            let mut passport = juan("12345678");
            passport.document_type = DocumentType::Passport;
            assert!(PatientService::create_patient(conn, passport, &actor, &client).is_ok());
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn client_history_number_must_be_unused() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            let mut first = juan("12345678");
            first.history_number = Some("HCE-000050".to_string());
            PatientService::create_patient(conn, first, &actor, &client)?;

            let mut clash = juan("87654321");
            clash.history_number = Some("HCE-000050".to_string());
            assert_matches!(
                PatientService::create_patient(conn, clash, &actor, &client),
                Err(PatientError::HistoryNumberTaken)
            );

            let next = PatientService::create_patient(conn, juan("87654321"), &actor, &client)?;
            assert_eq!(next.history_number, "HCE-000051");
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn malformed_history_number_is_rejected() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            for bad in ["HCE-99999999999999999999", "HCE-12", "hce-000001", "ABC-000001"] {
                let mut request = juan("12345678");
                request.history_number = Some(bad.to_string());
                assert_matches!(
                    PatientService::create_patient(conn, request, &actor, &client),
                    Err(PatientError::Validation(_))
                );
            }

            let next = PatientService::create_patient(conn, juan("12345678"), &actor, &client)?;
            assert_eq!(next.history_number, "HCE-000001");
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn exhausted_history_sequence_is_an_error() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            let mut last = juan("12345678");
            last.history_number = Some("HCE-999999".to_string());
            PatientService::create_patient(conn, last, &actor, &client)?;

            assert_matches!(
                PatientService::create_patient(conn, juan("87654321"), &actor, &client),
                Err(PatientError::HistoryNumbersExhausted)
            );
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();

        let count = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get::<_, i64>(0))
                    .map_err(PatientError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn soft_delete_frees_document_for_reuse() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            let patient = PatientService::create_patient(conn, juan("12345678"), &actor, &client)?;
            PatientService::delete_patient(conn, patient.id, &actor, &client)?;

            assert_matches!(PatientService::get_patient(conn, patient.id), Err(PatientError::NotFound));
            assert_matches!(
                PatientService::delete_patient(conn, patient.id, &actor, &client),
                Err(PatientError::NotFound)
            );
            assert!(PatientService::create_patient(conn, juan("12345678"), &actor, &client).is_ok());
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn update_rejects_taken_document() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            PatientService::create_patient(conn, juan("12345678"), &actor, &client)?;
            let other = PatientService::create_patient(conn, juan("87654321"), &actor, &client)?;

            let clash = UpdatePatientRequest {
                document_number: Some("12345678".to_string()),
                ..Default::default()
            };
            assert_matches!(
                PatientService::update_patient(conn, other.id, clash, &actor, &client),
                Err(PatientError::DocumentTaken)
            );

            let rename = UpdatePatientRequest {
                maternal_surname: Some("Gomez".to_string()),
                ..Default::default()
            };
            let updated = PatientService::update_patient(conn, other.id, rename, &actor, &client)?;
            assert_eq!(updated.full_name(), "Juan Perez Gomez");
            assert_eq!(updated.document_number, "87654321");
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_search_and_paginates() {
        let (db, actor) = setup().await;
        db.write(move |conn| {
            let client = ClientInfo::default();
            PatientService::create_patient(conn, juan("12345678"), &actor, &client)?;
            let mut maria = juan("87654321");
            maria.first_name = "Maria".to_string();
            maria.gender = Some(Gender::F);
            PatientService::create_patient(conn, maria, &actor, &client)?;

            let by_name = PatientService::list_patients(
                conn,
                &PatientListQuery { search: Some("MARIA".to_string()), ..Default::default() },
            )?;
            assert_eq!(by_name.items.len(), 1);
            assert_eq!(by_name.items[0].first_name, "Maria");

            let by_history = PatientService::list_patients(
                conn,
                &PatientListQuery { search: Some("hce-000001".to_string()), ..Default::default() },
            )?;
            assert_eq!(by_history.items[0].first_name, "Juan");

            let paged = PatientService::list_patients(
                conn,
                &PatientListQuery { limit: Some(1), page: Some(2), ..Default::default() },
            )?;
            assert_eq!(paged.items.len(), 1);
            assert_eq!(paged.pagination.total_records, 2);
            assert_eq!(paged.pagination.total_pages, 2);
            Ok::<_, PatientError>(())
        })
        .await
        .unwrap();
    }
}
