use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation ids starting with this prefix address a team or group channel,
/// never a user's personal one-to-one conversation.
pub const SHARED_CHANNEL_PREFIX: &str = "19:";

/// Returns `true` when `conversation_id` names a shared (team/group) channel.
pub fn is_shared_channel(conversation_id: &str) -> bool {
    conversation_id.starts_with(SHARED_CHANNEL_PREFIX)
}

/// A user in the directory store.
///
/// Rows are provisioned externally. The notifier only ever fills in
/// `conversation_id`; it never deletes a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    /// Stable, globally unique directory id
    pub aad_id: String,
    /// User principal name, the preferred addressing alias
    pub upn: Option<String>,
    pub email: Option<String>,
    /// One-to-one conversation with the bot, once created
    pub conversation_id: Option<String>,
    /// Gateway base URL for the user's tenant
    pub service_url: String,
    pub tenant_id: String,
    /// Gateway-side member id
    pub user_id: String,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// The alias a dispatch job should use to address this user.
    ///
    /// Prefers the UPN and falls back to the email; `None` when neither is set.
    pub fn address(&self) -> Option<&str> {
        [self.upn.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|alias| !alias.is_empty())
    }

    /// The stored conversation id, ignoring blank values.
    pub fn existing_conversation(&self) -> Option<&str> {
        self.conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Work queue message: one notification intent.
///
/// Field names follow the queue's wire format
/// (`{"Email": .., "ActivityToSend": .., "SendAllUsers": ..}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchJob {
    /// Lookup key for the recipient; required unless broadcasting
    #[serde(rename = "Email", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Opaque card payload delivered as-is
    #[serde(rename = "ActivityToSend")]
    pub activity: serde_json::Value,

    /// When `true` the job fans out to every addressable user instead
    #[serde(rename = "SendAllUsers", default, skip_serializing_if = "Option::is_none")]
    pub send_all_users: Option<bool>,
}

impl DispatchJob {
    /// A single-user job addressed by alias.
    pub fn for_user(email: impl Into<String>, activity: serde_json::Value) -> Self {
        Self {
            email: Some(email.into()),
            activity,
            send_all_users: None,
        }
    }

    /// A broadcast job that fans out to every user in the directory.
    pub fn broadcast(activity: serde_json::Value) -> Self {
        Self {
            email: None,
            activity,
            send_all_users: Some(true),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.send_all_users.unwrap_or(false)
    }
}
