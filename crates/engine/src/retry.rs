//! Bounded retry-on-throttle discipline shared by conversation creation and
//! message delivery.
//!
//! - 201 ends the loop with the created value
//! - 429 is retried up to `max_attempts`, sleeping a jittered delay between
//!   attempts but never after the last one
//! - any other status aborts immediately as `GatewayRejected`

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{DispatchError, GatewayOperation};
use crate::gateway::GatewayReply;

/// Lower bound of the jittered delay after a throttled attempt.
pub const JITTER_MIN_MS: u64 = 500;
/// Exclusive upper bound of the jittered delay.
pub const JITTER_MAX_MS: u64 = 1500;

/// Pause between throttled attempts.
#[async_trait]
pub trait Backoff: Send + Sync {
    /// Called after throttled attempt number `attempt` (1-based) when another
    /// attempt will follow.
    async fn wait(&self, attempt: u32);
}

/// Uniform random delay in `[min_ms, max_ms)`.
#[derive(Debug, Clone)]
pub struct JitterBackoff {
    min_ms: u64,
    max_ms: u64,
}

impl JitterBackoff {
    /// The range is widened to at least one millisecond so it is never empty.
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let min_ms = min_ms.min(u64::MAX - 1);
        Self {
            min_ms,
            max_ms: max_ms.max(min_ms.saturating_add(1)),
        }
    }

    pub fn delay(&self) -> Duration {
        let ms = rand::rng().random_range(self.min_ms..self.max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for JitterBackoff {
    fn default() -> Self {
        Self::new(JITTER_MIN_MS, JITTER_MAX_MS)
    }
}

#[async_trait]
impl Backoff for JitterBackoff {
    async fn wait(&self, attempt: u32) {
        let delay = self.delay();
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off after throttle");
        tokio::time::sleep(delay).await;
    }
}

/// How many gateway calls a single stage may make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Result of a retried gateway call that did not hard-fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed {
        value: T,
        attempts: u32,
        /// Throttled attempts before the successful one
        throttles: u32,
    },
    /// Every attempt was throttled
    Throttled { attempts: u32 },
}

/// Drive `call` under `policy`. `call` receives the 1-based attempt number.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    backoff: &dyn Backoff,
    operation: GatewayOperation,
    mut call: F,
) -> Result<RetryOutcome<T>, DispatchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<GatewayReply<T>, DispatchError>>,
{
    let max_attempts = policy.max_attempts();

    for attempt in 1..=max_attempts {
        match call(attempt).await? {
            GatewayReply::Created(value) => {
                return Ok(RetryOutcome::Completed {
                    value,
                    attempts: attempt,
                    throttles: attempt - 1,
                });
            }
            GatewayReply::Throttled => {
                tracing::warn!(%operation, attempt, max_attempts, "Gateway throttled request");
                if attempt < max_attempts {
                    backoff.wait(attempt).await;
                }
            }
            GatewayReply::Rejected(status) => {
                tracing::error!(%operation, attempt, status = %status, "Gateway rejected request");
                return Err(DispatchError::GatewayRejected { operation, status });
            }
        }
    }

    Ok(RetryOutcome::Throttled {
        attempts: max_attempts,
    })
}
