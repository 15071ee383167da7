//! Herald publisher API binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::redis_pool::create_redis_pool;
use herald_engine::queue::RedisJobQueue;

use herald_api::routes::create_router;
use herald_api::state::AppState;

/// Upper bound on a published job body.
const MAX_BODY_BYTES: usize = 256 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("herald_api=debug,herald_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let jwt_secret = config
        .api_jwt_secret
        .clone()
        .ok_or_else(|| AppError::Config("API_JWT_SECRET must be set".to_string()))?;

    // Create Redis connection
    let redis = create_redis_pool(&config.redis_url).await?;
    tracing::info!(queue = %config.dispatch_queue, "Redis connection established");

    // Build application state
    let queue = Arc::new(RedisJobQueue::new(redis, config.dispatch_queue.clone()));
    let state = AppState::new(queue, jwt_secret);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
