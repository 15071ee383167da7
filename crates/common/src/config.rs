use serde::Deserialize;

/// Default OAuth token endpoint for the bot messaging gateway.
pub const DEFAULT_TOKEN_ENDPOINT: &str =
    "https://login.microsoftonline.com/botframework.com/oauth2/v2.0/token";

/// Default scope requested in the client-credentials grant.
pub const DEFAULT_TOKEN_SCOPE: &str = "https://api.botframework.com/.default";

/// Upper bound on `MAX_NUMBER_OF_ATTEMPTS`. Bounds a single job to
/// `MAX_ATTEMPTS_CEILING × 1.5s` of backoff per gateway call.
pub const MAX_ATTEMPTS_CEILING: u32 = 10;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string (user directory)
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string (work queue)
    pub redis_url: String,

    /// Name of the Redis list carrying dispatch jobs
    pub dispatch_queue: String,

    /// Bot application id, used as OAuth client id and gateway bot id
    pub microsoft_app_id: String,

    /// Bot application secret for the client-credentials grant
    pub microsoft_app_password: String,

    /// OAuth token endpoint
    pub token_endpoint: String,

    /// OAuth scope requested with the token
    pub token_scope: String,

    /// Gateway calls per stage before giving up on throttling (default: 1)
    pub max_attempts: u32,

    /// Per-request timeout on outbound HTTP calls, in seconds (default: 30)
    pub http_timeout_secs: u64,

    /// Maximum number of jobs the notifier processes concurrently (default: 16)
    pub worker_concurrency: usize,

    /// Names this notifier's processing list; unique per running notifier (default: "0")
    pub notifier_instance: String,

    /// HS256 secret used to verify publisher tokens on the API
    pub api_jwt_secret: Option<String>,

    /// API listen port (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            dispatch_queue: std::env::var("DISPATCH_QUEUE")
                .unwrap_or_else(|_| "herald-notifier".to_string()),
            microsoft_app_id: std::env::var("MICROSOFT_APP_ID").map_err(|_| {
                anyhow::anyhow!("MICROSOFT_APP_ID environment variable is required")
            })?,
            microsoft_app_password: std::env::var("MICROSOFT_APP_PASSWORD").map_err(|_| {
                anyhow::anyhow!("MICROSOFT_APP_PASSWORD environment variable is required")
            })?,
            token_endpoint: std::env::var("TOKEN_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_TOKEN_ENDPOINT.to_string()),
            token_scope: std::env::var("TOKEN_SCOPE")
                .unwrap_or_else(|_| DEFAULT_TOKEN_SCOPE.to_string()),
            max_attempts: parse_max_attempts(std::env::var("MAX_NUMBER_OF_ATTEMPTS").ok().as_deref()),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a valid u64"))?,
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "16".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_CONCURRENCY must be a valid usize"))?,
            notifier_instance: std::env::var("NOTIFIER_INSTANCE").unwrap_or_else(|_| "0".to_string()),
            api_jwt_secret: std::env::var("API_JWT_SECRET").ok(),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
        })
    }

    /// Gateway-side bot identifier derived from the application id.
    pub fn bot_id(&self) -> String {
        format!("28:{}", self.microsoft_app_id)
    }
}

/// Interpret `MAX_NUMBER_OF_ATTEMPTS`.
///
/// Absent, unparseable or zero values fall back to a single attempt; anything
/// above [`MAX_ATTEMPTS_CEILING`] is clamped.
pub fn parse_max_attempts(raw: Option<&str>) -> u32 {
    match raw.and_then(|v| v.trim().parse::<u32>().ok()) {
        Some(0) | None => 1,
        Some(n) => n.min(MAX_ATTEMPTS_CEILING),
    }
}
