use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::middleware;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth_cell::AuthService;
use clinic_api::create_router;
use shared_config::AppConfig;
use shared_database::Database;
use shared_utils::rate_limit::{
    general_rate_limit, spawn_eviction_task, InMemoryRateLimitStore, RateLimitStore,
    RedisRateLimitStore,
};
use shared_utils::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Clinic API server");

    // Load configuration
    let config = AppConfig::from_env();
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path))?;

    bootstrap_admin(&config, &db).await?;

    let rate_limiter = build_rate_limiter(&config);
    spawn_eviction_task(rate_limiter.clone(), Duration::from_secs(60));

    let port = config.port;
    let cors = cors_layer(config.cors_origin.as_deref());
    let state = AppState::new(config, db, rate_limiter);

    // Build the application router
    let app = create_router(state.clone())
        .layer(middleware::from_fn_with_state(state, general_rate_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn bootstrap_admin(config: &AppConfig, db: &Database) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (
        config.bootstrap_admin_email.clone(),
        config.bootstrap_admin_password.clone(),
    ) else {
        return Ok(());
    };

    let auth = AuthService::new(config);
    let created = db
        .write(move |conn| auth.ensure_bootstrap_admin(conn, &email, &password))
        .await
        .context("creating bootstrap admin")?;

    if let Some(admin) = created {
        info!("Bootstrap admin {} created", admin.email);
    }
    Ok(())
}

fn build_rate_limiter(config: &AppConfig) -> Arc<dyn RateLimitStore> {
    if let Some(url) = &config.redis_url {
        match RedisRateLimitStore::connect(url) {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!("Redis unavailable ({}), falling back to in-memory rate limiting", e),
        }
    }
    Arc::new(InMemoryRateLimitStore::new())
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(_)) => {
            warn!("CORS_ORIGIN is not a valid header value, allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
