use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_common::{db, redis_pool};
use herald_engine::directory::PgUserDirectory;
use herald_engine::gateway::HttpGateway;
use herald_engine::handler::{Collaborators, DispatchJobHandler};
use herald_engine::queue::{RedisJobConsumer, RedisJobQueue};
use herald_engine::retry::{JitterBackoff, RetryPolicy};
use herald_engine::token::{HttpTokenSource, TokenCache};
use herald_notifier::worker::NotifierWorker;

/// BLMOVE window; bounds how long a shutdown request waits for the poll.
const POLL_TIMEOUT_SECS: f64 = 5.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_notifier=info,herald_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald notifier starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let producer = redis_pool::create_redis_pool(&config.redis_url).await?;
    let consumer = redis_pool::create_consumer_connection(&config.redis_url).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;

    let tokens = Arc::new(TokenCache::new(Arc::new(HttpTokenSource::from_config(
        http.clone(),
        &config,
    ))));

    let collaborators = Collaborators {
        directory: Arc::new(PgUserDirectory::new(pool)),
        queue: Arc::new(RedisJobQueue::new(producer, config.dispatch_queue.clone())),
        gateway: Arc::new(HttpGateway::new(http, config.bot_id())),
        tokens,
        backoff: Arc::new(JitterBackoff::default()),
    };
    let handler = Arc::new(DispatchJobHandler::new(
        collaborators,
        RetryPolicy::new(config.max_attempts),
    ));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut source = RedisJobConsumer::new(
        consumer,
        config.dispatch_queue.clone(),
        &config.notifier_instance,
        POLL_TIMEOUT_SECS,
    );
    source.recover_in_flight().await?;
    tracing::info!(
        queue = %config.dispatch_queue,
        max_attempts = config.max_attempts,
        "Consuming dispatch jobs"
    );

    let stats = NotifierWorker::new(source, handler, config.worker_concurrency, shutdown)
        .run()
        .await;

    tracing::info!(jobs = stats.total(), "Herald notifier stopped.");
    Ok(())
}
