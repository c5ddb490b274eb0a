use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::Database;

use crate::rate_limit::{InMemoryRateLimitStore, RateLimitStore};

/// State shared by every router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub rate_limiter: Arc<dyn RateLimitStore>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, rate_limiter: Arc<dyn RateLimitStore>) -> Self {
        Self {
            config: Arc::new(config),
            db,
            rate_limiter,
        }
    }

    /// State backed by the in-memory rate limiter.
    pub fn with_memory_limiter(config: AppConfig, db: Database) -> Self {
        Self::new(config, db, Arc::new(InMemoryRateLimitStore::new()))
    }
}
