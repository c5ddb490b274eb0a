use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

use shared_config::{AppConfig, RateLimitRule};
use rusqlite::params;
use shared_database::{Database, DatabaseError};
use shared_models::auth::{AuthUser, JwtClaims, Role};

use crate::state::AppState;

pub struct TestConfig {
    pub jwt_secret: String,
    pub webhook_secret: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            webhook_secret: "test-webhook-secret".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        let generous = RateLimitRule::new(10_000, 60);
        AppConfig {
            database_path: ":memory:".to_string(),
            jwt_secret: self.jwt_secret.clone(),
            billing_webhook_secret: self.webhook_secret.clone(),
            rate_limit_general: generous,
            rate_limit_external: generous,
            rate_limit_per_user: generous,
            environment: "test".to_string(),
            ..AppConfig::default()
        }
    }

    /// Fresh in-memory database plus state wired with the in-memory limiter.
    pub fn to_state(&self) -> AppState {
        self.state_with(self.to_app_config())
    }

    pub fn state_with(&self, config: AppConfig) -> AppState {
        let db = Database::open_in_memory().expect("in-memory database");
        AppState::with_memory_limiter(config, db)
    }
}

#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub doctor_id: Option<Uuid>,
    pub password_hash: String,
}

impl TestUser {
    pub fn new(email: &str, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Test".to_string(),
            last_name: role.as_str().to_string(),
            role,
            doctor_id: (role == Role::Doctor).then(Uuid::new_v4),
            password_hash: "!".to_string(),
        }
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, Role::Admin)
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, Role::Doctor)
    }

    pub fn nurse(email: &str) -> Self {
        Self::new(email, Role::Nurse)
    }

    pub fn receptionist(email: &str) -> Self {
        Self::new(email, Role::Receptionist)
    }

    pub fn with_password_hash(mut self, hash: &str) -> Self {
        self.password_hash = hash.to_string();
        self
    }

    pub fn to_auth_user(&self) -> AuthUser {
        AuthUser {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            doctor_id: self.doctor_id,
        }
    }

    /// Insert the user (and a doctor profile for doctors) into the database.
    pub async fn insert(&self, db: &Database) -> Result<(), DatabaseError> {
        let user = self.clone();
        db.write(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO users (id, email, password_hash, first_name, last_name, role, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                params![
                    user.id,
                    user.email,
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    user.role.as_str(),
                    now
                ],
            )?;
            if let Some(doctor_id) = user.doctor_id {
                conn.execute(
                    "INSERT INTO doctors (id, user_id, license_number, specialties, is_active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, '[\"general_medicine\"]', 1, ?4, ?4)",
                    params![doctor_id, user.id, format!("CMP-{}", &doctor_id.simple().to_string()[..8]), now],
                )?;
            }
            Ok(())
        })
        .await
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + Duration::hours(exp_hours.unwrap_or(24))).timestamp(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("test token")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::load_active_user;
    use crate::jwt::validate_token;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default().to_app_config();
        assert!(config.is_configured());
        assert!(config.is_webhook_configured());
        assert_eq!(config.rate_limit_login, AppConfig::default().rate_limit_login);
    }

    #[test]
    fn test_jwt_token_creation() {
        let config = TestConfig::default();
        let user = TestUser::nurse("nurse@clinic.test");
        let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));
        let claims = validate_token(&token, &config.jwt_secret).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, Role::Nurse);
    }

    #[tokio::test]
    async fn inserted_doctor_resolves_with_profile() {
        let state = TestConfig::default().to_state();
        let user = TestUser::doctor("doc@clinic.test");
        user.insert(&state.db).await.unwrap();

        let id = user.id;
        let loaded = state
            .db
            .read(move |conn| load_active_user(conn, id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.doctor_id, user.doctor_id);
        assert_eq!(loaded.role, Role::Doctor);
    }
}
