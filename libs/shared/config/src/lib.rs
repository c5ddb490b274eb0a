use std::env;
use std::str::FromStr;
use tracing::warn;

/// A request budget: `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self { max_requests, window_secs }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_expires_hours: i64,
    pub port: u16,
    pub cors_origin: Option<String>,
    pub conflict_window_minutes: i64,
    pub clinic_utc_offset_minutes: i32,
    pub min_password_length: usize,
    pub billing_webhook_secret: String,
    pub redis_url: Option<String>,
    /// Honor `X-Forwarded-For` / `X-Real-IP`; only safe behind a reverse proxy.
    pub trust_proxy: bool,
    pub rate_limit_general: RateLimitRule,
    pub rate_limit_login: RateLimitRule,
    pub rate_limit_external: RateLimitRule,
    pub rate_limit_per_user: RateLimitRule,
    /// Admin account created on startup when the user table is empty.
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "clinic.db".to_string(),
            jwt_secret: String::new(),
            jwt_expires_hours: 24,
            port: 3000,
            cors_origin: None,
            conflict_window_minutes: 30,
            clinic_utc_offset_minutes: 0,
            min_password_length: 6,
            billing_webhook_secret: String::new(),
            redis_url: None,
            trust_proxy: false,
            rate_limit_general: RateLimitRule::new(1000, 15 * 60),
            rate_limit_login: RateLimitRule::new(5, 15 * 60),
            rate_limit_external: RateLimitRule::new(200, 60),
            rate_limit_per_user: RateLimitRule::new(1000, 15 * 60),
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
            environment: "development".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_PATH not set, using default");
                    defaults.database_path.clone()
                }),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            jwt_expires_hours: parse_var("JWT_EXPIRES_HOURS", defaults.jwt_expires_hours),
            port: parse_var("PORT", defaults.port),
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty() && v != "*"),
            conflict_window_minutes: parse_var(
                "CONFLICT_WINDOW_MINUTES",
                defaults.conflict_window_minutes,
            ),
            clinic_utc_offset_minutes: parse_var(
                "CLINIC_UTC_OFFSET_MINUTES",
                defaults.clinic_utc_offset_minutes,
            ),
            min_password_length: parse_var("MIN_PASSWORD_LENGTH", defaults.min_password_length),
            billing_webhook_secret: env::var("BILLING_WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("BILLING_WEBHOOK_SECRET not set, billing webhook disabled");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            trust_proxy: parse_var("TRUST_PROXY", defaults.trust_proxy),
            rate_limit_general: parse_rule("RATE_LIMIT_GENERAL", defaults.rate_limit_general),
            rate_limit_login: parse_rule("RATE_LIMIT_LOGIN", defaults.rate_limit_login),
            rate_limit_external: parse_rule("RATE_LIMIT_EXTERNAL", defaults.rate_limit_external),
            rate_limit_per_user: parse_rule("RATE_LIMIT_PER_USER", defaults.rate_limit_per_user),
            bootstrap_admin_email: env::var("ADMIN_EMAIL").ok().filter(|v| !v.is_empty()),
            bootstrap_admin_password: env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty()),
            environment: env::var("APP_ENV")
                .unwrap_or_else(|_| defaults.environment.clone()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }

    pub fn is_webhook_configured(&self) -> bool {
        !self.billing_webhook_secret.is_empty()
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Parses `"<max>/<window_secs>"`, e.g. `"1000/900"`.
fn parse_rule(name: &str, default: RateLimitRule) -> RateLimitRule {
    let Ok(raw) = env::var(name) else {
        return default;
    };

    let parsed = raw
        .split_once('/')
        .and_then(|(max, window)| {
            Some((max.trim().parse::<u32>().ok()?, window.trim().parse::<u64>().ok()?))
        });

    match parsed {
        Some((max_requests, window_secs)) if window_secs > 0 => {
            RateLimitRule::new(max_requests, window_secs)
        }
        _ => {
            warn!("{} has an invalid value '{}', using default", name, raw);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_clinic_policy() {
        let config = AppConfig::default();
        assert_eq!(config.jwt_expires_hours, 24);
        assert_eq!(config.conflict_window_minutes, 30);
        assert_eq!(config.rate_limit_login, RateLimitRule::new(5, 900));
        assert!(!config.trust_proxy);
        assert!(!config.is_configured());
    }

    #[test]
    fn is_configured_requires_jwt_secret() {
        let config = AppConfig {
            jwt_secret: "secret".to_string(),
            ..AppConfig::default()
        };
        assert!(config.is_configured());
        assert!(!config.is_webhook_configured());
    }
}
