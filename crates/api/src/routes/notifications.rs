//! Dispatch job intake.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use herald_common::error::AppError;
use herald_common::types::DispatchJob;
use herald_engine::error::DispatchError;

use crate::middleware::auth::Publisher;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notifications", post(enqueue_notification))
}

/// POST /api/notifications: Queue a single-user or broadcast dispatch job.
async fn enqueue_notification(
    State(state): State<AppState>,
    publisher: Publisher,
    Json(mut job): Json<DispatchJob>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    validate(&mut job)?;

    state.queue.publish(&job).await.map_err(queue_error)?;

    tracing::info!(
        publisher = %publisher.id,
        broadcast = job.is_broadcast(),
        "Dispatch job queued"
    );
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true }))))
}

/// Broadcasts need only a payload; everything else needs a recipient address.
fn validate(job: &mut DispatchJob) -> Result<(), AppError> {
    if job.activity.is_null() {
        return Err(AppError::Validation("ActivityToSend is required".to_string()));
    }
    if job.is_broadcast() {
        return Ok(());
    }

    match job.email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => {
            job.email = Some(email.to_string());
            Ok(())
        }
        _ => Err(AppError::Validation(
            "Email is required unless SendAllUsers is true".to_string(),
        )),
    }
}

fn queue_error(e: DispatchError) -> AppError {
    match e {
        DispatchError::Queue(e) => AppError::Queue(e),
        DispatchError::Serialization(e) => AppError::Serialization(e),
        other => AppError::Internal(other.to_string()),
    }
}
