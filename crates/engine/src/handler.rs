//! Dispatch job handler: the entry point run once per queue message.
//!
//! ```text
//! raw message ─► decode ─┬─► broadcast ─► BroadcastFanout (terminal)
//!                        └─► single user ─► lookup ─► resolve ─► send
//! ```
//!
//! Every failure is caught here and logged; nothing propagates to the worker.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use herald_common::types::DispatchJob;

use crate::directory::UserDirectory;
use crate::dispatcher::{DispatchOutcome, MessageDispatcher};
use crate::error::{DispatchError, GatewayOperation};
use crate::fanout::{BroadcastFanout, FanoutReport};
use crate::gateway::ConversationGateway;
use crate::queue::JobQueue;
use crate::resolver::{ConversationResolver, ResolveOutcome};
use crate::retry::{Backoff, RetryPolicy};
use crate::token::TokenCache;

/// How a dispatch job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Broadcast(FanoutReport),
    Delivered {
        conversation_id: String,
        throttles: u32,
    },
    /// Dropped after exhausting the retry budget at `stage`
    Throttled {
        stage: GatewayOperation,
        throttles: u32,
    },
    Failed(DispatchError),
}

/// External services the handler drives.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn UserDirectory>,
    pub queue: Arc<dyn JobQueue>,
    pub gateway: Arc<dyn ConversationGateway>,
    pub tokens: Arc<TokenCache>,
    pub backoff: Arc<dyn Backoff>,
}

pub struct DispatchJobHandler {
    directory: Arc<dyn UserDirectory>,
    resolver: ConversationResolver,
    dispatcher: MessageDispatcher,
    fanout: BroadcastFanout,
}

impl DispatchJobHandler {
    pub fn new(collaborators: Collaborators, policy: RetryPolicy) -> Self {
        let Collaborators {
            directory,
            queue,
            gateway,
            tokens,
            backoff,
        } = collaborators;

        Self {
            resolver: ConversationResolver::new(
                gateway.clone(),
                directory.clone(),
                tokens.clone(),
                backoff.clone(),
                policy,
            ),
            dispatcher: MessageDispatcher::new(gateway, tokens, backoff, policy),
            fanout: BroadcastFanout::new(directory.clone(), queue),
            directory,
        }
    }

    /// Handle one raw queue message. Never fails; errors become
    /// [`JobOutcome::Failed`] after being logged.
    pub async fn handle(&self, raw: &str) -> JobOutcome {
        let span = tracing::info_span!("dispatch_job", job_id = %Uuid::new_v4());

        async {
            let result = match serde_json::from_str::<DispatchJob>(raw) {
                Ok(job) => self.process(job).await,
                Err(e) => Err(DispatchError::MalformedJob(e.to_string())),
            };

            match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(kind = e.kind(), error = %e, "Dispatch job failed");
                    JobOutcome::Failed(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run a decoded job to completion.
    pub async fn process(&self, job: DispatchJob) -> Result<JobOutcome, DispatchError> {
        if job.is_broadcast() {
            let report = self.fanout.fan_out(&job.activity).await?;
            return Ok(JobOutcome::Broadcast(report));
        }

        let email = job
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| DispatchError::MalformedJob("missing Email on single-user job".to_string()))?
            .to_lowercase();

        let user = self
            .directory
            .find_by_address(&email)
            .await?
            .ok_or_else(|| DispatchError::UserNotFound(email.clone()))?;

        tracing::debug!(email = %email, aad_id = %user.aad_id, "Recipient found");

        let (conversation_id, mut throttles) = match self.resolver.resolve(&user).await? {
            ResolveOutcome::Resolved {
                conversation_id,
                throttles,
                ..
            } => (conversation_id, throttles),
            ResolveOutcome::Throttled { attempts } => {
                tracing::warn!(email = %email, throttles = attempts, "Dropping job: conversation creation throttled");
                return Ok(JobOutcome::Throttled {
                    stage: GatewayOperation::CreateConversation,
                    throttles: attempts,
                });
            }
        };

        match self
            .dispatcher
            .send(&user.service_url, &conversation_id, &job.activity)
            .await?
        {
            DispatchOutcome::Delivered {
                throttles: send_throttles,
                ..
            } => {
                throttles += send_throttles;
                tracing::info!(email = %email, conversation_id = %conversation_id, throttles, "Notification delivered");
                Ok(JobOutcome::Delivered {
                    conversation_id,
                    throttles,
                })
            }
            DispatchOutcome::Throttled { attempts } => {
                throttles += attempts;
                tracing::warn!(email = %email, conversation_id = %conversation_id, throttles, "Dropping job: message throttled");
                Ok(JobOutcome::Throttled {
                    stage: GatewayOperation::SendActivity,
                    throttles,
                })
            }
        }
    }
}
