use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use crate::domain::Account;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("account is not authenticated")]
    NotAuthenticated,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("guard challenge was not answered in time")]
    ChallengeTimeout,
    #[error("action rejected: {0}")]
    ActionRejected(String),
    #[error("broker request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A live login session as reported by the identity provider. Carries the
/// durable credentials the worker persists back onto the account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Authentication and the comment primitive, as the core consumes them. The
/// login protocol itself lives behind this seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, account: &Account) -> Result<Session, IdentityError>;
    async fn is_authenticated(&self, account_id: Uuid) -> bool;
    async fn deauthenticate(&self, account_id: Uuid) -> Result<(), IdentityError>;
    async fn post_comment(
        &self,
        account_id: Uuid,
        target_id: &str,
        text: &str,
    ) -> Result<Option<String>, IdentityError>;
}

/// One-shot continuations for out-of-band guard challenges, keyed by account.
/// Entries expire with the waiting login so an unanswered challenge cannot
/// leak.
#[derive(Default)]
pub struct ChallengeHub {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<String>>>,
}

impl ChallengeHub {
    /// Deliver an answer. Returns false when no login is waiting for one.
    pub fn resolve(&self, account_id: Uuid, code: String) -> bool {
        self.pending
            .lock()
            .expect("challenge lock poisoned")
            .remove(&account_id)
            .map(|tx| tx.send(code).is_ok())
            .unwrap_or(false)
    }

    pub fn pending_accounts(&self) -> Vec<Uuid> {
        self.pending
            .lock()
            .expect("challenge lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Park until an answer arrives or the timeout passes. A second wait for
    /// the same account replaces the first.
    pub async fn wait(&self, account_id: Uuid, timeout: Duration) -> Result<String, IdentityError> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("challenge lock poisoned")
            .insert(account_id, tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(code)) => Ok(code),
            _ => {
                self.pending
                    .lock()
                    .expect("challenge lock poisoned")
                    .remove(&account_id);
                Err(IdentityError::ChallengeTimeout)
            }
        }
    }
}

/// HTTP client for the session-broker sidecar that holds the actual platform
/// sessions.
pub struct SessionBrokerClient {
    client: Client,
    base_url: String,
    challenges: Arc<ChallengeHub>,
    challenge_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionRequest<'a> {
    account_id: Uuid,
    login: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionStatus {
    #[serde(default)]
    authenticated: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostCommentResponse {
    #[serde(default)]
    comment_id: Option<String>,
}

#[derive(Deserialize)]
struct ChallengePrompt {
    #[serde(default)]
    domain: Option<String>,
}

impl SessionBrokerClient {
    pub fn new(
        base_url: String,
        challenges: Arc<ChallengeHub>,
        challenge_timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                IdentityError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            challenges,
            challenge_timeout,
        })
    }

    pub fn challenges(&self) -> &Arc<ChallengeHub> {
        &self.challenges
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_message(resp: reqwest::Response) -> String {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {status}"))
    }

    async fn read_session(resp: reqwest::Response) -> Result<Session, IdentityError> {
        resp.json::<Session>()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for SessionBrokerClient {
    async fn authenticate(&self, account: &Account) -> Result<Session, IdentityError> {
        let request = OpenSessionRequest {
            account_id: account.id,
            login: &account.login,
            auth_token: account.auth_token.as_deref(),
        };

        let resp = self
            .client
            .post(self.url("/sessions"))
            .json(&request)
            .send()
            .await
            .map_err(|e| IdentityError::RequestFailed(e.to_string()))?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Self::read_session(resp).await,
            // The broker parks the login until the guard challenge is
            // answered out of band.
            StatusCode::ACCEPTED => {
                let prompt = resp.json::<ChallengePrompt>().await.unwrap_or(ChallengePrompt {
                    domain: None,
                });
                warn!(
                    account = %account.login,
                    domain = prompt.domain.as_deref().unwrap_or("unknown"),
                    "Guard challenge required, waiting for answer"
                );

                let code = self
                    .challenges
                    .wait(account.id, self.challenge_timeout)
                    .await?;

                let resp = self
                    .client
                    .post(self.url(&format!("/sessions/{}/challenge", account.id)))
                    .json(&serde_json::json!({ "code": code }))
                    .send()
                    .await
                    .map_err(|e| IdentityError::RequestFailed(e.to_string()))?;

                if !resp.status().is_success() {
                    return Err(IdentityError::AuthFailed(Self::error_message(resp).await));
                }
                Self::read_session(resp).await
            }
            _ => Err(IdentityError::AuthFailed(Self::error_message(resp).await)),
        }
    }

    async fn is_authenticated(&self, account_id: Uuid) -> bool {
        let resp = self
            .client
            .get(self.url(&format!("/sessions/{}", account_id)))
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => resp
                .json::<SessionStatus>()
                .await
                .map(|s| s.authenticated)
                .unwrap_or(false),
            _ => false,
        }
    }

    async fn deauthenticate(&self, account_id: Uuid) -> Result<(), IdentityError> {
        let resp = self
            .client
            .delete(self.url(&format!("/sessions/{}", account_id)))
            .send()
            .await
            .map_err(|e| IdentityError::RequestFailed(e.to_string()))?;

        // Already gone is as good as removed.
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(IdentityError::RequestFailed(Self::error_message(resp).await))
    }

    async fn post_comment(
        &self,
        account_id: Uuid,
        target_id: &str,
        text: &str,
    ) -> Result<Option<String>, IdentityError> {
        let resp = self
            .client
            .post(self.url(&format!("/sessions/{}/comments", account_id)))
            .json(&serde_json::json!({ "targetId": target_id, "text": text }))
            .send()
            .await
            .map_err(|e| IdentityError::RequestFailed(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED => Err(IdentityError::NotAuthenticated),
            status if status.is_success() => resp
                .json::<PostCommentResponse>()
                .await
                .map(|r| r.comment_id)
                .map_err(|e| IdentityError::InvalidResponse(e.to_string())),
            // The broker relays the platform's refusal message verbatim;
            // classification happens upstream.
            _ => Err(IdentityError::ActionRejected(Self::error_message(resp).await)),
        }
    }
}
