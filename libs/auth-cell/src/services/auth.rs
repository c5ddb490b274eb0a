use std::sync::LazyLock;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::DoctorService;
use security_cell::{
    AuditAction, AuditContext, AuditEntry, AuditService, EntityType, PasswordSecurityService,
};
use shared_config::AppConfig;
use shared_database::{parse_column, Database, DatabaseError};
use shared_models::auth::{AuthUser, Role};
use shared_utils::extractor::ClientInfo;
use shared_utils::jwt::issue_token;

use crate::models::{
    AuthError, ChangePasswordRequest, CreateUserRequest, LoginRequest, LoginResponse, User,
    UserProfile, EMAIL_REGEX,
};

/// Verified when the email is unknown so both failure paths cost one hash check.
static DECOY_HASH: LazyLock<String> = LazyLock::new(|| {
    PasswordSecurityService::hash_password("decoy-password-for-unknown-accounts").unwrap_or_default()
});

#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    jwt_expires_hours: i64,
    min_password_length: usize,
}

impl AuthService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            jwt_expires_hours: config.jwt_expires_hours,
            min_password_length: config.min_password_length,
        }
    }

    /// Unknown email and wrong password fail identically. The hash check runs on
    /// the blocking pool outside the connection lock, against a decoy hash when
    /// the email is unknown.
    pub async fn login(
        &self,
        db: &Database,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginResponse, AuthError> {
        let email = request.email.trim().to_lowercase();
        debug!("Login attempt for {}", email);

        let found = db
            .read(move |conn| find_active_by_email(conn, &email))
            .await?;

        let password = request.password;
        let verified = tokio::task::spawn_blocking(move || match found {
            Some((user, hash)) => {
                PasswordSecurityService::verify_password(&password, &hash).then_some(user)
            }
            None => {
                PasswordSecurityService::verify_password(&password, &DECOY_HASH);
                None
            }
        })
        .await
        .map_err(|e| AuthError::Database(DatabaseError::TaskFailed(e.to_string())))?;

        let Some(user) = verified else {
            warn!("Login failed: unknown account or wrong password");
            return Err(AuthError::InvalidCredentials);
        };

        let service = self.clone();
        let client = client.clone();
        db.write(move |conn| service.complete_login(conn, user, &client))
            .await
    }

    fn complete_login(
        &self,
        conn: &Connection,
        user: User,
        client: &ClientInfo,
    ) -> Result<LoginResponse, AuthError> {
        let now = Utc::now();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now, user.id],
        )?;

        let token = issue_token(
            user.id,
            &user.email,
            user.role,
            &self.jwt_secret,
            self.jwt_expires_hours,
        )?;

        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Login, EntityType::User, user.id)
                .with_user(user.id)
                .with_context(AuditContext::Login { role: user.role })
                .with_client(client),
        );

        let profile = self.profile(conn, user.id)?;
        info!(user_id = %user.id, "User logged in");
        Ok(LoginResponse {
            message: "Login successful".to_string(),
            token,
            user: profile,
        })
    }

    pub fn logout(&self, conn: &Connection, user: &AuthUser, client: &ClientInfo) {
        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Logout, EntityType::User, user.id)
                .with_user(user.id)
                .with_context(AuditContext::Logout)
                .with_client(client),
        );
        info!(user_id = %user.id, "User logged out");
    }

    pub fn profile(&self, conn: &Connection, user_id: Uuid) -> Result<UserProfile, AuthError> {
        let user = get_user(conn, user_id)?.ok_or(AuthError::UserNotFound)?;
        let doctor = match user.role {
            Role::Doctor => DoctorService::find_by_user(conn, user_id)?,
            _ => None,
        };
        Ok(UserProfile { user, doctor })
    }

    pub fn change_password(
        &self,
        conn: &Connection,
        user: &AuthUser,
        request: ChangePasswordRequest,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let (Some(current), Some(new_password)) = (request.current_password, request.new_password)
        else {
            return Err(AuthError::Validation(
                "Current password and new password are required".to_string(),
            ));
        };

        PasswordSecurityService::validate_new_password(&new_password, self.min_password_length)?;

        let stored_hash: String = conn
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                [user.id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(AuthError::UserNotFound)?;

        if !PasswordSecurityService::verify_password(&current, &stored_hash) {
            warn!(user_id = %user.id, "Password change rejected: wrong current password");
            return Err(AuthError::CurrentPasswordIncorrect);
        }

        let new_hash = PasswordSecurityService::hash_password(&new_password)?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_hash, Utc::now(), user.id],
        )?;

        AuditService::record(
            conn,
            AuditEntry::new(AuditAction::Update, EntityType::User, user.id)
                .with_user(user.id)
                .with_context(AuditContext::PasswordChange)
                .with_client(client),
        );

        info!(user_id = %user.id, "Password changed");
        Ok(())
    }

    pub fn create_user(
        &self,
        conn: &Connection,
        actor: Option<&AuthUser>,
        request: CreateUserRequest,
        client: &ClientInfo,
    ) -> Result<User, AuthError> {
        let email = request.email.trim().to_lowercase();
        if !EMAIL_REGEX.is_match(&email) {
            return Err(AuthError::Validation("Invalid email format".to_string()));
        }
        let role: Role = request
            .role
            .parse()
            .map_err(|_| AuthError::Validation("Invalid role".to_string()))?;
        let (first_name, last_name) = (request.first_name.trim(), request.last_name.trim());
        if first_name.is_empty() || last_name.is_empty() {
            return Err(AuthError::Validation(
                "First name and last name are required".to_string(),
            ));
        }
        if first_name.chars().count() > 100 || last_name.chars().count() > 100 {
            return Err(AuthError::Validation(
                "Names must be at most 100 characters".to_string(),
            ));
        }
        PasswordSecurityService::validate_new_password(&request.password, self.min_password_length)?;

        if email_exists(conn, &email)? {
            return Err(AuthError::EmailTaken);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let password_hash = PasswordSecurityService::hash_password(&request.password)?;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, role, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
            params![id, email, password_hash, first_name, last_name, role.as_str(), now],
        )?;

        let user = get_user(conn, id)?.ok_or(AuthError::UserNotFound)?;
        let mut entry = AuditEntry::new(AuditAction::Create, EntityType::User, id)
            .with_new(&user)
            .with_context(AuditContext::UserCreated { role })
            .with_client(client);
        if let Some(actor) = actor {
            entry = entry.with_user(actor.id);
        }
        AuditService::record(conn, entry);

        info!(user_id = %id, role = %role, "User created");
        Ok(user)
    }

    /// Create the configured admin account when the database has no users.
    pub fn ensure_bootstrap_admin(
        &self,
        conn: &Connection,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if users > 0 {
            return Ok(None);
        }

        let request = CreateUserRequest {
            email: email.to_string(),
            password: password.to_string(),
            first_name: "System".to_string(),
            last_name: "Administrator".to_string(),
            role: Role::Admin.as_str().to_string(),
        };
        self.create_user(conn, None, request, &ClientInfo::default())
            .map(Some)
    }
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        role: parse_column(row, "role")?,
        is_active: row.get("is_active")?,
        last_login: row.get("last_login")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn get_user(conn: &Connection, user_id: Uuid) -> Result<Option<User>, AuthError> {
    let user = conn
        .query_row("SELECT * FROM users WHERE id = ?1", [user_id], map_user)
        .optional()?;
    Ok(user)
}

fn find_active_by_email(conn: &Connection, email: &str) -> Result<Option<(User, String)>, AuthError> {
    let found = conn
        .query_row(
            "SELECT * FROM users WHERE email = ?1 AND is_active = 1",
            [email],
            |row| Ok((map_user(row)?, row.get::<_, String>("password_hash")?)),
        )
        .optional()?;
    Ok(found)
}

fn email_exists(conn: &Connection, email: &str) -> Result<bool, AuthError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
        [email],
        |row| row.get(0),
    )?;
    Ok(exists)
}
