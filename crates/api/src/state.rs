//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_engine::queue::JobQueue;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(queue: Arc<dyn JobQueue>, jwt_secret: impl Into<String>) -> Self {
        Self {
            queue,
            jwt_secret: jwt_secret.into(),
        }
    }
}
