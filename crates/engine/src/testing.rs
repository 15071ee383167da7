//! In-memory fakes of the engine's collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;

use herald_common::types::UserRecord;

use crate::directory::UserDirectory;
use crate::error::DispatchError;
use crate::gateway::{ConversationGateway, GatewayReply};
use crate::queue::JobQueue;
use crate::retry::Backoff;
use crate::token::{AccessTokenResponse, CachedToken, TokenCache, TokenSource};

pub fn user(aad_id: &str, upn: &str) -> UserRecord {
    UserRecord {
        aad_id: aad_id.to_string(),
        upn: Some(upn.to_string()),
        email: None,
        conversation_id: None,
        service_url: "https://smba.example.net/emea/".to_string(),
        tenant_id: "tenant-1".to_string(),
        user_id: format!("29:{aad_id}"),
        updated_at: Utc::now(),
    }
}

/// Token cache holding a token valid for the next hour.
pub fn fresh_tokens() -> Arc<TokenCache> {
    Arc::new(TokenCache::with_token(
        Arc::new(FakeTokenSource::new()),
        CachedToken {
            access_token: "cached-token".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        },
    ))
}

pub struct FakeTokenSource {
    calls: AtomicU32,
    latency_ms: u64,
    fail: bool,
    expires_in: Option<i64>,
}

impl FakeTokenSource {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            latency_ms: 0,
            fail: false,
            expires_in: Some(3600),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_expires_in(mut self, expires_in: Option<i64>) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for FakeTokenSource {
    async fn fetch_token(&self) -> Result<AccessTokenResponse, DispatchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
        if self.fail {
            return Err(DispatchError::AuthenticationFailure {
                status: StatusCode::UNAUTHORIZED,
            });
        }
        Ok(AccessTokenResponse {
            token_type: Some("Bearer".to_string()),
            expires_in: self.expires_in,
            access_token: format!("issued-{call}"),
        })
    }
}

#[derive(Default)]
pub struct CountingBackoff {
    waits: AtomicU32,
}

impl CountingBackoff {
    pub fn waits(&self) -> u32 {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backoff for CountingBackoff {
    async fn wait(&self, _attempt: u32) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    users: Mutex<Vec<UserRecord>>,
    upserts: Mutex<Vec<UserRecord>>,
}

impl FakeDirectory {
    pub fn with_users(users: Vec<UserRecord>) -> Self {
        Self {
            users: Mutex::new(users),
            upserts: Mutex::new(Vec::new()),
        }
    }

    pub fn upserts(&self) -> Vec<UserRecord> {
        self.upserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn find_by_id(&self, aad_id: &str) -> Result<Option<UserRecord>, DispatchError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|u| u.aad_id == aad_id)
            .cloned())
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<UserRecord>, DispatchError> {
        let matches = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|value| value.eq_ignore_ascii_case(address))
        };
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| matches(&u.email) || matches(&u.upn))
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<UserRecord>, DispatchError> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn upsert(&self, user: &UserRecord) -> Result<(), DispatchError> {
        self.upserts.lock().unwrap().push(user.clone());
        let mut users = self.users.lock().unwrap();
        match users.iter_mut().find(|u| u.aad_id == user.aad_id) {
            Some(existing) => *existing = user.clone(),
            None => users.push(user.clone()),
        }
        Ok(())
    }
}

/// Queue recording published batches; batches whose publish index is listed
/// in `fail_on` are refused.
#[derive(Default)]
pub struct FakeQueue {
    batches: Mutex<Vec<Vec<String>>>,
    publishes: AtomicU32,
    fail_on: Vec<u32>,
}

impl FakeQueue {
    pub fn failing_on(indexes: &[u32]) -> Self {
        Self {
            fail_on: indexes.to_vec(),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn publish_batch(&self, messages: &[String]) -> Result<(), DispatchError> {
        let index = self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&index) {
            return Err(DispatchError::InvalidResponse(format!("queue refused batch {index}")));
        }
        self.batches.lock().unwrap().push(messages.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentActivity {
    pub service_url: String,
    pub conversation_id: String,
    pub activity: serde_json::Value,
    pub token: String,
}

/// Gateway answering from per-operation scripts; once a script runs dry every
/// further call is throttled.
pub struct ScriptedGateway {
    create_script: Mutex<VecDeque<GatewayReply<String>>>,
    send_script: Mutex<VecDeque<GatewayReply<()>>>,
    create_calls: AtomicU32,
    sent: Mutex<Vec<SentActivity>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            create_script: Mutex::new(VecDeque::new()),
            send_script: Mutex::new(VecDeque::new()),
            create_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_create_script(self, script: Vec<GatewayReply<String>>) -> Self {
        *self.create_script.lock().unwrap() = script.into();
        self
    }

    pub fn with_send_script(self, script: Vec<GatewayReply<()>>) -> Self {
        *self.send_script.lock().unwrap() = script.into();
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> u32 {
        self.sent.lock().unwrap().len() as u32
    }

    pub fn sent(&self) -> Vec<SentActivity> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationGateway for ScriptedGateway {
    async fn create_conversation(
        &self,
        _user: &UserRecord,
        _token: &str,
    ) -> Result<GatewayReply<String>, DispatchError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .create_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(GatewayReply::Throttled))
    }

    async fn send_activity(
        &self,
        service_url: &str,
        conversation_id: &str,
        activity: &serde_json::Value,
        token: &str,
    ) -> Result<GatewayReply<()>, DispatchError> {
        self.sent.lock().unwrap().push(SentActivity {
            service_url: service_url.to_string(),
            conversation_id: conversation_id.to_string(),
            activity: activity.clone(),
            token: token.to_string(),
        });
        Ok(self
            .send_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(GatewayReply::Throttled))
    }
}
