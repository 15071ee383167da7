//! Conversation resolver: finds or lazily creates a user's one-to-one
//! conversation with the bot.

use std::sync::Arc;

use herald_common::types::{UserRecord, is_shared_channel};

use crate::directory::UserDirectory;
use crate::error::{DispatchError, GatewayOperation};
use crate::gateway::ConversationGateway;
use crate::retry::{Backoff, RetryOutcome, RetryPolicy, run_with_retry};
use crate::token::TokenCache;

/// Outcome of resolving a user's conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved {
        conversation_id: String,
        /// `true` when the conversation was created by this call
        created: bool,
        throttles: u32,
    },
    /// Every create attempt was throttled
    Throttled { attempts: u32 },
}

pub struct ConversationResolver {
    gateway: Arc<dyn ConversationGateway>,
    directory: Arc<dyn UserDirectory>,
    tokens: Arc<TokenCache>,
    backoff: Arc<dyn Backoff>,
    policy: RetryPolicy,
}

impl ConversationResolver {
    pub fn new(
        gateway: Arc<dyn ConversationGateway>,
        directory: Arc<dyn UserDirectory>,
        tokens: Arc<TokenCache>,
        backoff: Arc<dyn Backoff>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            directory,
            tokens,
            backoff,
            policy,
        }
    }

    /// Return the user's conversation id, creating the conversation if needed.
    ///
    /// A record that already carries a conversation id is answered without any
    /// gateway call. A newly created id is written back to the directory unless
    /// it names a shared channel.
    pub async fn resolve(&self, user: &UserRecord) -> Result<ResolveOutcome, DispatchError> {
        if let Some(existing) = user.existing_conversation() {
            tracing::debug!(aad_id = %user.aad_id, conversation_id = existing, "Reusing stored conversation");
            return Ok(ResolveOutcome::Resolved {
                conversation_id: existing.to_string(),
                created: false,
                throttles: 0,
            });
        }

        // A redelivered or concurrent job may have created it since `user` was read.
        if let Some(stored) = self.directory.find_by_id(&user.aad_id).await?
            && let Some(existing) = stored.existing_conversation()
        {
            tracing::debug!(aad_id = %user.aad_id, conversation_id = existing, "Conversation created by an earlier job");
            return Ok(ResolveOutcome::Resolved {
                conversation_id: existing.to_string(),
                created: false,
                throttles: 0,
            });
        }

        let gateway = self.gateway.as_ref();
        let tokens = self.tokens.as_ref();
        let outcome = run_with_retry(
            self.policy,
            self.backoff.as_ref(),
            GatewayOperation::CreateConversation,
            move |_| async move {
                let token = tokens.get_valid_token().await?;
                gateway.create_conversation(user, &token).await
            },
        )
        .await?;

        match outcome {
            RetryOutcome::Completed {
                value: conversation_id,
                throttles,
                ..
            } => {
                if is_shared_channel(&conversation_id) {
                    tracing::warn!(
                        aad_id = %user.aad_id,
                        conversation_id = %conversation_id,
                        "Gateway returned a shared channel; not storing it as the user's conversation"
                    );
                } else {
                    let mut updated = user.clone();
                    updated.conversation_id = Some(conversation_id.clone());
                    self.directory.upsert(&updated).await?;
                }

                tracing::info!(
                    aad_id = %user.aad_id,
                    conversation_id = %conversation_id,
                    throttles,
                    "Conversation created"
                );

                Ok(ResolveOutcome::Resolved {
                    conversation_id,
                    created: true,
                    throttles,
                })
            }
            RetryOutcome::Throttled { attempts } => {
                tracing::warn!(aad_id = %user.aad_id, attempts, "Conversation creation throttled on every attempt");
                Ok(ResolveOutcome::Throttled { attempts })
            }
        }
    }
}
