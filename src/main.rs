use anyhow::Result;
use axum::{
    Router,
    http::{Method, header},
    middleware::from_fn,
    middleware::from_fn_with_state,
    routing::get,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod cache;
mod config;
mod db;
mod error;
mod gateway;
mod middleware;
mod models;
mod qr;

/// How often the background sweepers run.
const SWEEP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "fitpass_api=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = config::Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("incomplete environment ({}), using development defaults", e);
        config::Config::default()
    });

    // Database connection
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations completed");

    // Redis connection (cache, revocation set, rate limits)
    let redis_client = redis::Client::open(config.redis_url.clone())?;
    let redis_conn = ConnectionManager::new(redis_client).await?;
    tracing::info!("Connected to Redis");

    let state = api::AppState::new(pool, redis_conn, config.clone());

    // Background jobs: event expiry sweep and payment order cleanup.
    spawn_sweepers(state.clone());

    // Configure CORS for the frontend origins (comma-separated list)
    let origins: Vec<header::HeaderValue> = config
        .frontend_url
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    tracing::info!("CORS configured for origins: {}", config.frontend_url);

    // Build router
    let app = Router::new()
        .route("/health", get(api::health::health_check))
        .route("/ping", get(api::health::ping))
        .nest("/v1", api::routes::v1_routes())
        .layer(from_fn_with_state(
            state.clone(),
            middleware::identity_context,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(from_fn(middleware::request_id));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Periodic maintenance: deactivate expired events and cancel stale
/// pending payment orders. Both passes are idempotent.
fn spawn_sweepers(state: api::AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;

            if let Err(e) = api::events::expire_sweep(&state).await {
                tracing::error!("expire sweep failed: {}", e);
            }

            if let Err(e) = api::payments::cleanup_expired(&state).await {
                tracing::error!("payment order cleanup failed: {}", e);
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
