// =====================================================================================
// PASSWORD SECURITY SERVICE - HASHING AND POLICY
// =====================================================================================

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use tracing::{debug, instrument};

use crate::models::SecurityError;

pub struct PasswordSecurityService;

impl PasswordSecurityService {
    #[instrument(skip(password))]
    pub fn hash_password(password: &str) -> Result<String, SecurityError> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| SecurityError::Hashing(e.to_string()))?;
        Ok(password_hash.to_string())
    }

    /// `Ok(false)` for a wrong password or an unparseable stored hash.
    #[instrument(skip(password, hash))]
    pub fn verify_password(password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Stored password hash is not a PHC string: {}", e);
                return false;
            }
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    pub fn validate_new_password(password: &str, min_length: usize) -> Result<(), SecurityError> {
        if password.chars().count() < min_length {
            return Err(SecurityError::PasswordTooShort(min_length));
        }
        Ok(())
    }
}
