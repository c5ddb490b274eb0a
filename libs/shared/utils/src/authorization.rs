use tracing::warn;
use uuid::Uuid;

use shared_models::auth::{AuthUser, Role};
use shared_models::error::AppError;

/// Coarse permissions checked by handlers before touching data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Full patient records.
    PatientRead,
    /// Lookup by identity document only.
    PatientSearch,
    PatientWrite,
    AppointmentRead,
    /// A doctor's daily schedule.
    ScheduleRead,
    AppointmentWrite,
    ClinicalRecords,
    DoctorRead,
    /// Doctor/user management, audit trail, billing integration.
    Administration,
}

impl Permission {
    pub fn allowed_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            Permission::PatientRead => &[Admin, Doctor, Nurse],
            Permission::PatientSearch => &[Admin, Doctor, Nurse, Receptionist],
            Permission::PatientWrite => &[Admin, Doctor],
            Permission::AppointmentRead => &[Admin, Doctor, Nurse],
            Permission::ScheduleRead => &[Admin, Doctor, Nurse, Receptionist],
            Permission::AppointmentWrite => &[Admin, Doctor],
            Permission::ClinicalRecords => &[Admin, Doctor],
            Permission::DoctorRead => &[Admin, Doctor, Nurse, Receptionist],
            Permission::Administration => &[Admin],
        }
    }
}

pub fn has_permission(role: Role, permission: Permission) -> bool {
    permission.allowed_roles().contains(&role)
}

pub fn require_permission(user: &AuthUser, permission: Permission) -> Result<(), AppError> {
    if has_permission(user.role, permission) {
        return Ok(());
    }

    warn!(user_id = %user.id, role = %user.role, ?permission, "Access denied");
    let required = permission
        .allowed_roles()
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    Err(AppError::Forbidden(format!(
        "Insufficient permissions. Required roles: {}",
        required
    )))
}

/// Doctors may only act on their own appointments; other roles pass through.
pub fn ensure_doctor_scope(user: &AuthUser, doctor_id: Uuid) -> Result<(), AppError> {
    if user.role != Role::Doctor {
        return Ok(());
    }
    match user.doctor_id {
        Some(own) if own == doctor_id => Ok(()),
        Some(_) => Err(AppError::Forbidden(
            "Doctors can only access their own appointments".to_string(),
        )),
        None => Err(AppError::Forbidden("Doctor profile not found".to_string())),
    }
}

/// Narrows a list filter to the caller's own doctor id when the caller is a doctor.
pub fn scoped_doctor_filter(user: &AuthUser, requested: Option<Uuid>) -> Result<Option<Uuid>, AppError> {
    if user.role != Role::Doctor {
        return Ok(requested);
    }
    let own = user
        .doctor_id
        .ok_or_else(|| AppError::Forbidden("Doctor profile not found".to_string()))?;
    match requested {
        Some(id) if id != own => Err(AppError::Forbidden(
            "Doctors can only access their own appointments".to_string(),
        )),
        _ => Ok(Some(own)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn user(role: Role, doctor_id: Option<Uuid>) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: format!("{}@clinic.test", role),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            role,
            doctor_id,
        }
    }

    #[test]
    fn receptionist_gets_narrow_read_slice() {
        let receptionist = user(Role::Receptionist, None);
        assert!(require_permission(&receptionist, Permission::PatientSearch).is_ok());
        assert!(require_permission(&receptionist, Permission::ScheduleRead).is_ok());
        assert_matches!(
            require_permission(&receptionist, Permission::PatientRead),
            Err(AppError::Forbidden(_))
        );
        assert_matches!(
            require_permission(&receptionist, Permission::AppointmentWrite),
            Err(AppError::Forbidden(_))
        );
    }

    #[test]
    fn nurse_is_read_only() {
        assert!(has_permission(Role::Nurse, Permission::PatientRead));
        assert!(has_permission(Role::Nurse, Permission::AppointmentRead));
        assert!(!has_permission(Role::Nurse, Permission::PatientWrite));
        assert!(!has_permission(Role::Nurse, Permission::ClinicalRecords));
    }

    #[test]
    fn forbidden_message_lists_required_roles() {
        let nurse = user(Role::Nurse, None);
        let err = require_permission(&nurse, Permission::Administration).unwrap_err();
        assert_matches!(err, AppError::Forbidden(msg) if msg.ends_with("Required roles: admin"));
    }

    #[test]
    fn doctor_scope_limits_to_own_id() {
        let own = Uuid::new_v4();
        let doctor = user(Role::Doctor, Some(own));
        assert!(ensure_doctor_scope(&doctor, own).is_ok());
        assert_matches!(ensure_doctor_scope(&doctor, Uuid::new_v4()), Err(AppError::Forbidden(_)));
        assert!(ensure_doctor_scope(&user(Role::Admin, None), Uuid::new_v4()).is_ok());
    }

    #[test]
    fn doctor_list_filter_is_forced() {
        let own = Uuid::new_v4();
        let doctor = user(Role::Doctor, Some(own));
        assert_eq!(scoped_doctor_filter(&doctor, None).unwrap(), Some(own));
        assert!(scoped_doctor_filter(&doctor, Some(Uuid::new_v4())).is_err());
        assert_eq!(scoped_doctor_filter(&user(Role::Nurse, None), None).unwrap(), None);
    }
}
