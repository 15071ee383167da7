use reqwest::StatusCode;
use thiserror::Error;

/// Gateway operation that produced a response, for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOperation {
    CreateConversation,
    SendActivity,
}

impl std::fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayOperation::CreateConversation => write!(f, "create_conversation"),
            GatewayOperation::SendActivity => write!(f, "send_activity"),
        }
    }
}

/// Failures that end a dispatch job.
///
/// Throttling is deliberately absent: exhausting the retry budget on HTTP 429
/// is an outcome, not an error.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Token endpoint rejected the client-credentials grant ({status})")]
    AuthenticationFailure { status: StatusCode },

    #[error("Gateway rejected {operation} with {status}")]
    GatewayRejected {
        operation: GatewayOperation,
        status: StatusCode,
    },

    #[error("No user found for '{0}'")]
    UserNotFound(String),

    #[error("Malformed dispatch job: {0}")]
    MalformedJob(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Directory error: {0}")]
    Directory(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Short machine-readable label used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::AuthenticationFailure { .. } => "authentication_failure",
            DispatchError::GatewayRejected { .. } => "gateway_rejected",
            DispatchError::UserNotFound(_) => "user_not_found",
            DispatchError::MalformedJob(_) => "malformed_job",
            DispatchError::Transport(_) => "transport",
            DispatchError::InvalidResponse(_) => "invalid_response",
            DispatchError::Directory(_) => "directory",
            DispatchError::Queue(_) => "queue",
            DispatchError::Serialization(_) => "serialization",
        }
    }
}
