//! Message dispatcher: posts a card payload into a resolved conversation.

use std::sync::Arc;

use crate::error::{DispatchError, GatewayOperation};
use crate::gateway::ConversationGateway;
use crate::retry::{Backoff, RetryOutcome, RetryPolicy, run_with_retry};
use crate::token::TokenCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { attempts: u32, throttles: u32 },
    /// Every send attempt was throttled
    Throttled { attempts: u32 },
}

pub struct MessageDispatcher {
    gateway: Arc<dyn ConversationGateway>,
    tokens: Arc<TokenCache>,
    backoff: Arc<dyn Backoff>,
    policy: RetryPolicy,
}

impl MessageDispatcher {
    pub fn new(
        gateway: Arc<dyn ConversationGateway>,
        tokens: Arc<TokenCache>,
        backoff: Arc<dyn Backoff>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            tokens,
            backoff,
            policy,
        }
    }

    /// Deliver `activity` to `conversation_id` on the gateway at `service_url`.
    ///
    /// Has no side effect besides the network calls.
    pub async fn send(
        &self,
        service_url: &str,
        conversation_id: &str,
        activity: &serde_json::Value,
    ) -> Result<DispatchOutcome, DispatchError> {
        let gateway = self.gateway.as_ref();
        let tokens = self.tokens.as_ref();
        let outcome = run_with_retry(
            self.policy,
            self.backoff.as_ref(),
            GatewayOperation::SendActivity,
            move |_| async move {
                let token = tokens.get_valid_token().await?;
                gateway
                    .send_activity(service_url, conversation_id, activity, &token)
                    .await
            },
        )
        .await?;

        Ok(match outcome {
            RetryOutcome::Completed {
                attempts, throttles, ..
            } => {
                tracing::info!(conversation_id, attempts, throttles, "Message delivered");
                DispatchOutcome::Delivered {
                    attempts,
                    throttles,
                }
            }
            RetryOutcome::Throttled { attempts } => {
                tracing::warn!(conversation_id, attempts, "Message throttled on every attempt");
                DispatchOutcome::Throttled { attempts }
            }
        })
    }
}
