use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use security_cell::{AuditAction, AuditEntry, AuditService, EntityType};
use shared_models::auth::{AuthUser, Role};
use shared_utils::extractor::ClientInfo;

use crate::models::{CreateDoctorRequest, Doctor, DoctorError, DoctorSearchQuery};

const DOCTOR_SELECT: &str = "SELECT d.*, u.first_name, u.last_name, u.email
     FROM doctors d
     JOIN users u ON u.id = d.user_id";

pub struct DoctorService;

impl DoctorService {
    pub fn create_doctor(
        conn: &Connection,
        request: CreateDoctorRequest,
        actor: &AuthUser,
        client: &ClientInfo,
    ) -> Result<Doctor, DoctorError> {
        debug!("Creating doctor profile for user {}", request.user_id);

        let license_number = request.license_number.trim().to_string();
        if license_number.is_empty() || license_number.len() > 20 {
            return Err(DoctorError::Validation(
                "license_number is required and must be at most 20 characters".to_string(),
            ));
        }
        if request.consultation_fee.is_some_and(|fee| fee < 0.0) {
            return Err(DoctorError::Validation("consultation_fee must be positive".to_string()));
        }

        let user: Option<(String, bool)> = conn
            .query_row(
                "SELECT role, is_active FROM users WHERE id = ?1",
                [request.user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match user {
            None => return Err(DoctorError::UserNotFound),
            Some((role, active)) if role != Role::Doctor.as_str() || !active => {
                return Err(DoctorError::UserNotEligible)
            }
            Some(_) => {}
        }

        if Self::find_by_user(conn, request.user_id)?.is_some() {
            return Err(DoctorError::ProfileExists);
        }

        let license_taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM doctors WHERE license_number = ?1)",
            [&license_number],
            |row| row.get(0),
        )?;
        if license_taken {
            warn!("Duplicate license number {}", license_number);
            return Err(DoctorError::LicenseTaken);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let specialties: Vec<String> = request
            .specialties
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        conn.execute(
            "INSERT INTO doctors (id, user_id, license_number, specialties, external_code, license_expiry, consultation_fee, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
            params![
                id,
                request.user_id,
                license_number,
                serde_json::to_value(&specialties).unwrap_or(Value::Array(vec![])),
                request.external_code,
                request.license_expiry,
                request.consultation_fee,
                now,
            ],
        )?;

        let doctor = Self::get_doctor(conn, id)?;
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Create, EntityType::Doctor, id)
                .with_user(actor.id)
                .with_new(&doctor)
                .with_client(client),
        );

        info!("Doctor profile {} created", id);
        Ok(doctor)
    }

    pub fn get_doctor(conn: &Connection, doctor_id: Uuid) -> Result<Doctor, DoctorError> {
        conn.query_row(
            &format!("{DOCTOR_SELECT} WHERE d.id = ?1"),
            [doctor_id],
            map_doctor,
        )
        .optional()?
        .ok_or(DoctorError::NotFound)
    }

    pub fn find_by_user(conn: &Connection, user_id: Uuid) -> Result<Option<Doctor>, DoctorError> {
        let doctor = conn
            .query_row(
                &format!("{DOCTOR_SELECT} WHERE d.user_id = ?1"),
                [user_id],
                map_doctor,
            )
            .optional()?;
        Ok(doctor)
    }

    /// A doctor can take appointments only while both the profile and the
    /// linked user account are active.
    pub fn ensure_active(conn: &Connection, doctor_id: Uuid) -> Result<Doctor, DoctorError> {
        let doctor = Self::get_doctor(conn, doctor_id)?;
        let user_active: bool = conn.query_row(
            "SELECT is_active FROM users WHERE id = ?1",
            [doctor.user_id],
            |row| row.get(0),
        )?;
        if !doctor.is_active || !user_active {
            return Err(DoctorError::Inactive);
        }
        Ok(doctor)
    }

    pub fn list_doctors(conn: &Connection, query: &DoctorSearchQuery) -> Result<Vec<Doctor>, DoctorError> {
        let mut stmt = conn.prepare(&format!(
            "{DOCTOR_SELECT}
             WHERE d.is_active = 1 AND u.is_active = 1
               AND (?1 IS NULL OR LOWER(u.first_name || ' ' || u.last_name) LIKE '%' || LOWER(?1) || '%')
             ORDER BY u.last_name, u.first_name"
        ))?;
        let doctors = stmt
            .query_map([query.search.as_deref()], map_doctor)?
            .collect::<Result<Vec<_>, _>>()?;

        let doctors = match query.specialty.as_deref() {
            Some(specialty) => doctors
                .into_iter()
                .filter(|d| d.specialties.iter().any(|s| s.eq_ignore_ascii_case(specialty)))
                .collect(),
            None => doctors,
        };
        Ok(doctors)
    }
}

fn map_doctor(row: &Row<'_>) -> rusqlite::Result<Doctor> {
    let specialties: Value = row.get("specialties")?;
    Ok(Doctor {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        license_number: row.get("license_number")?,
        specialties: serde_json::from_value(specialties).unwrap_or_default(),
        external_code: row.get("external_code")?,
        license_expiry: row.get("license_expiry")?,
        consultation_fee: row.get("consultation_fee")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_database::{Database, DatabaseError};
    use shared_utils::test_utils::TestUser;

    fn request(user_id: Uuid, license: &str) -> CreateDoctorRequest {
        CreateDoctorRequest {
            user_id,
            license_number: license.to_string(),
            specialties: vec!["cardiology".to_string(), " ".to_string()],
            external_code: None,
            license_expiry: None,
            consultation_fee: Some(120.0),
        }
    }

    async fn user_without_profile(db: &Database, role: Role) -> TestUser {
        let mut user = TestUser::new(&format!("{}-{}@clinic.test", role, Uuid::new_v4()), role);
        user.doctor_id = None;
        user.insert(db).await.unwrap();
        user
    }

    #[tokio::test]
    async fn creates_profile_and_rejects_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let admin = TestUser::admin("admin@clinic.test");
        admin.insert(&db).await.unwrap();
        let user = user_without_profile(&db, Role::Doctor).await;
        let other = user_without_profile(&db, Role::Doctor).await;

        let (actor, user_id, other_id) = (admin.to_auth_user(), user.id, other.id);
        db.write(move |conn| {
            let doctor = DoctorService::create_doctor(conn, request(user_id, "CMP-1"), &actor, &ClientInfo::default())?;
            assert_eq!(doctor.specialties, vec!["cardiology".to_string()]);
            assert_eq!(doctor.full_name(), "Dr. Test doctor");

            assert_matches!(
                DoctorService::create_doctor(conn, request(user_id, "CMP-2"), &actor, &ClientInfo::default()),
                Err(DoctorError::ProfileExists)
            );
            assert_matches!(
                DoctorService::create_doctor(conn, request(other_id, "CMP-1"), &actor, &ClientInfo::default()),
                Err(DoctorError::LicenseTaken)
            );
            Ok::<_, DoctorError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn only_active_doctor_users_are_eligible() {
        let db = Database::open_in_memory().unwrap();
        let admin = TestUser::admin("admin@clinic.test");
        admin.insert(&db).await.unwrap();
        let nurse = user_without_profile(&db, Role::Nurse).await;

        let (actor, nurse_id) = (admin.to_auth_user(), nurse.id);
        let result = db
            .write(move |conn| {
                DoctorService::create_doctor(conn, request(nurse_id, "CMP-9"), &actor, &ClientInfo::default())
            })
            .await;
        assert_matches!(result, Err(DoctorError::UserNotEligible));
    }

    #[tokio::test]
    async fn inactive_user_makes_doctor_inactive() {
        let db = Database::open_in_memory().unwrap();
        let doctor = TestUser::doctor("doc@clinic.test");
        doctor.insert(&db).await.unwrap();
        let (doctor_id, user_id) = (doctor.doctor_id.unwrap(), doctor.id);

        db.write(move |conn| {
            assert!(DoctorService::ensure_active(conn, doctor_id).is_ok());
            conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", [user_id])
                .map_err(DatabaseError::from)?;
            assert_matches!(DoctorService::ensure_active(conn, doctor_id), Err(DoctorError::Inactive));
            assert_matches!(DoctorService::ensure_active(conn, Uuid::new_v4()), Err(DoctorError::NotFound));
            Ok::<_, DoctorError>(())
        })
        .await
        .unwrap();
    }
}
