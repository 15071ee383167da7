//! Messaging gateway client.
//!
//! Two operations are consumed: creating a one-to-one conversation with a user
//! and posting an activity into a conversation. Both answer 201 on success and
//! 429 when the caller is being rate limited.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use herald_common::types::UserRecord;

use crate::error::DispatchError;

/// Content type of the card attachment wrapped around every payload.
pub const ADAPTIVE_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

/// Classified gateway response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply<T> {
    /// 201 Created, with the decoded body
    Created(T),
    /// 429 Too Many Requests
    Throttled,
    /// Any other status
    Rejected(StatusCode),
}

#[async_trait]
pub trait ConversationGateway: Send + Sync {
    /// Open a one-to-one conversation between the bot and `user`.
    async fn create_conversation(
        &self,
        user: &UserRecord,
        token: &str,
    ) -> Result<GatewayReply<String>, DispatchError>;

    /// Post `activity` as an adaptive card into `conversation_id`.
    async fn send_activity(
        &self,
        service_url: &str,
        conversation_id: &str,
        activity: &serde_json::Value,
        token: &str,
    ) -> Result<GatewayReply<()>, DispatchError>;
}

#[derive(Debug, Serialize)]
pub struct ChannelAccount<'a> {
    pub id: &'a str,
}

/// Body of `POST {serviceUrl}/v3/conversations`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest<'a> {
    pub bot: ChannelAccount<'a>,
    pub is_group: bool,
    pub tenant_id: &'a str,
    pub members: Vec<ChannelAccount<'a>>,
}

/// Response of a successful conversation creation. Only `id` is required.
#[derive(Debug, Deserialize)]
pub struct ConversationResource {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAttachment<'a> {
    pub content_type: &'static str,
    pub content: &'a serde_json::Value,
}

/// Body of `POST {serviceUrl}/v3/conversations/{id}/activities`.
#[derive(Debug, Serialize)]
pub struct MessageActivity<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attachments: Vec<CardAttachment<'a>>,
}

impl<'a> MessageActivity<'a> {
    /// Wrap an opaque card payload in the message envelope.
    pub fn card(content: &'a serde_json::Value) -> Self {
        Self {
            kind: "message",
            attachments: vec![CardAttachment {
                content_type: ADAPTIVE_CARD_CONTENT_TYPE,
                content,
            }],
        }
    }
}

/// Gateway client over HTTP.
pub struct HttpGateway {
    http: reqwest::Client,
    bot_id: String,
}

impl HttpGateway {
    /// `bot_id` is the gateway-side bot account (`28:<app id>`).
    pub fn new(http: reqwest::Client, bot_id: impl Into<String>) -> Self {
        Self {
            http,
            bot_id: bot_id.into(),
        }
    }
}

/// `{serviceUrl}/v3/conversations`, tolerant of a trailing slash on the base.
pub fn conversations_url(service_url: &str) -> String {
    format!("{}/v3/conversations", service_url.trim_end_matches('/'))
}

pub fn activities_url(service_url: &str, conversation_id: &str) -> String {
    format!(
        "{}/{}/activities",
        conversations_url(service_url),
        conversation_id
    )
}

#[async_trait]
impl ConversationGateway for HttpGateway {
    async fn create_conversation(
        &self,
        user: &UserRecord,
        token: &str,
    ) -> Result<GatewayReply<String>, DispatchError> {
        let body = CreateConversationRequest {
            bot: ChannelAccount { id: &self.bot_id },
            is_group: false,
            tenant_id: &user.tenant_id,
            members: vec![ChannelAccount { id: &user.user_id }],
        };

        let response = self
            .http
            .post(conversations_url(&user.service_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                let resource: ConversationResource = response.json().await.map_err(|e| {
                    DispatchError::InvalidResponse(format!("create conversation: {e}"))
                })?;
                Ok(GatewayReply::Created(resource.id))
            }
            StatusCode::TOO_MANY_REQUESTS => Ok(GatewayReply::Throttled),
            status => Ok(GatewayReply::Rejected(status)),
        }
    }

    async fn send_activity(
        &self,
        service_url: &str,
        conversation_id: &str,
        activity: &serde_json::Value,
        token: &str,
    ) -> Result<GatewayReply<()>, DispatchError> {
        let response = self
            .http
            .post(activities_url(service_url, conversation_id))
            .bearer_auth(token)
            .json(&MessageActivity::card(activity))
            .send()
            .await?;

        Ok(match response.status() {
            StatusCode::CREATED => GatewayReply::Created(()),
            StatusCode::TOO_MANY_REQUESTS => GatewayReply::Throttled,
            status => GatewayReply::Rejected(status),
        })
    }
}
