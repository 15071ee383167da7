use redis::Client;
use redis::aio::{ConnectionManager, MultiplexedConnection};

/// Create a Redis connection manager used for publishing to the work queue.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}

/// Open a dedicated connection for blocking reads (`BLMOVE`).
///
/// Blocking commands stall every request sharing the connection, so the
/// consumer never borrows the publishing `ConnectionManager`.
pub async fn create_consumer_connection(redis_url: &str) -> anyhow::Result<MultiplexedConnection> {
    let client = Client::open(redis_url)?;
    let conn = client.get_multiplexed_async_connection().await?;

    tracing::info!("Opened Redis consumer connection");
    Ok(conn)
}
