//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to drive the Axum router without a real HTTP
//! server, over an in-memory work queue.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use herald_api::middleware::auth::encode_jwt;
use herald_api::routes::create_router;
use herald_api::state::AppState;
use herald_common::types::DispatchJob;
use herald_engine::error::DispatchError;
use herald_engine::queue::JobQueue;

const TEST_SECRET: &str = "test-jwt-secret-for-integration-tests";

// ============================================================
// Helpers
// ============================================================

#[derive(Default)]
struct MemoryQueue {
    messages: Mutex<Vec<String>>,
    unavailable: bool,
}

impl MemoryQueue {
    fn jobs(&self) -> Vec<DispatchJob> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn publish_batch(&self, messages: &[String]) -> Result<(), DispatchError> {
        if self.unavailable {
            return Err(DispatchError::InvalidResponse("queue offline".to_string()));
        }
        self.messages.lock().unwrap().extend_from_slice(messages);
        Ok(())
    }
}

fn app(queue: Arc<MemoryQueue>) -> Router {
    create_router(AppState::new(queue, TEST_SECRET))
}

fn post_notification(token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/notifications")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn token() -> String {
    encode_jwt("hr-portal", TEST_SECRET, 1).unwrap()
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn test_health() {
    let response = app(Arc::default())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "herald-api");
}

// ============================================================
// Authentication
// ============================================================

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let queue = Arc::new(MemoryQueue::default());
    let response = app(queue.clone())
        .oneshot(post_notification(
            None,
            json!({"Email": "ada@contoso.com", "ActivityToSend": {}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(queue.jobs().is_empty());
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_unauthorized() {
    let forged = encode_jwt("hr-portal", "some-other-secret", 1).unwrap();
    let response = app(Arc::default())
        .oneshot(post_notification(
            Some(&forged),
            json!({"Email": "ada@contoso.com", "ActivityToSend": {}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================
// Notifications
// ============================================================

#[tokio::test]
async fn test_single_user_job_is_queued() {
    let queue = Arc::new(MemoryQueue::default());
    let card = json!({"type": "AdaptiveCard", "version": "1.4", "body": []});

    let response = app(queue.clone())
        .oneshot(post_notification(
            Some(&token()),
            json!({"Email": " ada@contoso.com ", "ActivityToSend": card}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await, json!({"queued": true}));
    assert_eq!(queue.jobs(), vec![DispatchJob::for_user("ada@contoso.com", card)]);
}

#[tokio::test]
async fn test_broadcast_job_is_queued_without_email() {
    let queue = Arc::new(MemoryQueue::default());

    let response = app(queue.clone())
        .oneshot(post_notification(
            Some(&token()),
            json!({"SendAllUsers": true, "ActivityToSend": {"type": "AdaptiveCard"}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let jobs = queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].is_broadcast());
}

#[tokio::test]
async fn test_missing_email_is_bad_request() {
    let queue = Arc::new(MemoryQueue::default());

    let response = app(queue.clone())
        .oneshot(post_notification(
            Some(&token()),
            json!({"SendAllUsers": false, "ActivityToSend": {}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].as_str().unwrap().contains("Email"));
    assert!(queue.jobs().is_empty());
}

#[tokio::test]
async fn test_queue_failure_is_server_error() {
    let queue = Arc::new(MemoryQueue {
        unavailable: true,
        ..MemoryQueue::default()
    });

    let response = app(queue)
        .oneshot(post_notification(
            Some(&token()),
            json!({"Email": "ada@contoso.com", "ActivityToSend": {}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
