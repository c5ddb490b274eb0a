use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use shared_config::RateLimitRule;
use shared_models::error::AppError;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit backend unavailable: {0}")]
    Backend(String),
}

/// Outcome of counting one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

/// Fixed-window request counter keyed by an arbitrary string.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, key: &str, rule: RateLimitRule) -> Result<RateLimitDecision, RateLimitError>;

    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;

    /// Drop windows that have already elapsed. Returns how many were removed.
    async fn evict_expired(&self) -> usize {
        0
    }
}

// =====================================================================================
// IN-MEMORY STORE
// =====================================================================================

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    length: Duration,
    count: u32,
}

impl Window {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length
    }
}

#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: RwLock<HashMap<String, Window>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(&self, key: &str, rule: RateLimitRule) -> Result<RateLimitDecision, RateLimitError> {
        let now = Instant::now();
        let length = Duration::from_secs(rule.window_secs);
        let mut windows = self.windows.write().await;

        let window = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if w.is_expired(now) {
                    *w = Window { started: now, length, count: 0 };
                }
            })
            .or_insert(Window { started: now, length, count: 0 });

        window.count = window.count.saturating_add(1);
        let elapsed = now.duration_since(window.started);
        let retry_after_secs = length.saturating_sub(elapsed).as_secs().max(1);

        Ok(RateLimitDecision {
            allowed: window.count <= rule.max_requests,
            remaining: rule.max_requests.saturating_sub(window.count),
            retry_after_secs,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.windows.write().await.remove(key);
        Ok(())
    }

    async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now));
        before - windows.len()
    }
}

// =====================================================================================
// REDIS STORE
// =====================================================================================

pub struct RedisRateLimitStore {
    pool: Pool,
    prefix: String,
}

impl RedisRateLimitStore {
    pub fn connect(redis_url: &str) -> Result<Self, RateLimitError> {
        let pool = RedisConfig::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        info!("Rate limiting backed by Redis");
        Ok(Self {
            pool,
            prefix: "clinic:ratelimit:".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(&self, key: &str, rule: RateLimitRule) -> Result<RateLimitDecision, RateLimitError> {
        let key = self.key(key);
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        let count: u32 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        if count == 1 {
            let _: () = conn
                .expire(&key, rule.window_secs as i64)
                .await
                .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        }
        let ttl: i64 = conn
            .ttl(&key)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        Ok(RateLimitDecision {
            allowed: count <= rule.max_requests,
            remaining: rule.max_requests.saturating_sub(count),
            retry_after_secs: if ttl > 0 { ttl as u64 } else { rule.window_secs },
        })
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let key = self.key(key);
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        Ok(())
    }
}

// =====================================================================================
// ENFORCEMENT
// =====================================================================================

/// Count a request and reject it with 429 once the window is exhausted.
///
/// Backend failures are logged and let the request through.
pub async fn enforce(
    store: &dyn RateLimitStore,
    key: &str,
    rule: RateLimitRule,
) -> Result<(), AppError> {
    match store.hit(key, rule).await {
        Ok(decision) if decision.allowed => Ok(()),
        Ok(decision) => {
            warn!(key = %key, limit = rule.max_requests, "Rate limit exceeded");
            Err(AppError::RateLimited {
                retry_after: decision.retry_after_secs,
            })
        }
        Err(e) => {
            warn!("Rate limiter error, allowing request: {}", e);
            Ok(())
        }
    }
}

/// Client address for rate limiting and audit. Proxy headers are honored only
/// when `trust_proxy` is set; otherwise the socket peer is used.
pub fn client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> String {
    let forwarded = trust_proxy
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| {
                    headers
                        .get("x-real-ip")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                })
        })
        .flatten();

    forwarded
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_ip(request: &Request<Body>, trust_proxy: bool) -> String {
    client_ip(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
        trust_proxy,
    )
}

/// Per-IP budget applied to the whole API.
pub async fn general_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let key = format!("general:{}", request_ip(&request, state.config.trust_proxy));
    enforce(state.rate_limiter.as_ref(), &key, state.config.rate_limit_general).await?;
    Ok(next.run(request).await)
}

/// Per-IP budget for billing-system integration endpoints.
pub async fn external_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let key = format!("external:{}", request_ip(&request, state.config.trust_proxy));
    enforce(state.rate_limiter.as_ref(), &key, state.config.rate_limit_external).await?;
    Ok(next.run(request).await)
}

/// Periodically evicts elapsed windows from the store.
pub fn spawn_eviction_task(
    store: std::sync::Arc<dyn RateLimitStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = store.evict_expired().await;
            if evicted > 0 {
                debug!("Evicted {} expired rate-limit windows", evicted);
            }
        }
    })
}
