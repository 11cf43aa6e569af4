use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::time::sleep;

use crate::domain::{ExchangeProfile, ExchangeTask, ExchangeUser};

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("no response from the exchange")]
    NoResponse,
    #[error("rate limited")]
    RateLimited,
    #[error("exchange rejected the request: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("API token is not set")]
    MissingToken,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Retry configuration for exchange API calls
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Check if status code is retryable (500, 502, 503)
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503)
}

/// The remote task source, as the orchestration core consumes it. The token
/// is injected per run, matching the settings snapshot semantics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskSource: Send + Sync {
    fn set_api_token(&self, token: &str);
    async fn list_profiles(&self) -> Result<Vec<ExchangeProfile>, ExchangeError>;
    async fn register_profile(&self, platform_id: &str) -> Result<(), ExchangeError>;
    async fn list_tasks(&self, profile_id: &str) -> Result<Vec<ExchangeTask>, ExchangeError>;
    async fn acknowledge_task(
        &self,
        task_id: &str,
        comment_id: &str,
        profile_id: &str,
    ) -> Result<(), ExchangeError>;
    async fn user_info(&self) -> Result<ExchangeUser, ExchangeError>;
}

pub struct ExchangeClient {
    client: Client,
    base_url: String,
    api_token: RwLock<Option<String>>,
}

impl ExchangeClient {
    pub fn new(base_url: String, api_token: Option<String>) -> Result<Self, ExchangeError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!("rep-swarm/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                ExchangeError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            api_token: RwLock::new(api_token),
        })
    }

    /// Token must be present on every call; the exchange authenticates by a
    /// request parameter rather than a header.
    fn token(&self) -> Result<String, ExchangeError> {
        self.api_token
            .read()
            .expect("token lock poisoned")
            .clone()
            .ok_or(ExchangeError::MissingToken)
    }

    pub async fn validate_token(&self) -> bool {
        self.user_info().await.is_ok()
    }

    async fn send_with_retry(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Response, ExchangeError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut last_error: Option<ExchangeError> = None;

        for attempt in 0..MAX_RETRIES {
            let request = if method == Method::GET {
                self.client.get(&url).query(params)
            } else {
                self.client.request(method.clone(), &url).form(params)
            };

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    if status == 429 {
                        return Err(ExchangeError::RateLimited);
                    }

                    if is_retryable_status(status) && attempt < MAX_RETRIES - 1 {
                        let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                        sleep(Duration::from_millis(backoff)).await;
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    last_error = Some(if e.is_timeout() || e.is_connect() {
                        ExchangeError::NoResponse
                    } else {
                        ExchangeError::RequestFailed(e.to_string())
                    });
                    if attempt < MAX_RETRIES - 1 {
                        let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                        sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExchangeError::RequestFailed("Max retries exceeded".into())))
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ExchangeError> {
        let token = self.token()?;
        let mut params: Vec<(&str, &str)> = params.to_vec();
        params.push(("apiToken", token.as_str()));

        let resp = self.send_with_retry(method, endpoint, &params).await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            // The exchange reports failures as { "error": "..." }.
            if let Ok(payload) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Some(message) = payload.get("error").and_then(|e| e.as_str()) {
                    return Err(ExchangeError::Rejected(message.to_string()));
                }
            }
            return Err(ExchangeError::RequestFailed(format!("HTTP {status}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl TaskSource for ExchangeClient {
    fn set_api_token(&self, token: &str) {
        *self.api_token.write().expect("token lock poisoned") = Some(token.to_string());
    }

    async fn list_profiles(&self) -> Result<Vec<ExchangeProfile>, ExchangeError> {
        let profiles: Vec<WireProfile> = self
            .request(Method::GET, "/user/steamprofiles", &[])
            .await?;
        Ok(profiles.into_iter().map(Into::into).collect())
    }

    async fn register_profile(&self, platform_id: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .request(
                Method::POST,
                "/user/steamprofiles/add",
                &[("steamProfile", platform_id)],
            )
            .await?;
        Ok(())
    }

    async fn list_tasks(&self, profile_id: &str) -> Result<Vec<ExchangeTask>, ExchangeError> {
        let tasks: Vec<WireTask> = self
            .request(Method::GET, "/tasks", &[("steamProfile", profile_id)])
            .await?;
        Ok(tasks.into_iter().map(Into::into).collect())
    }

    async fn acknowledge_task(
        &self,
        task_id: &str,
        comment_id: &str,
        profile_id: &str,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .request(
                Method::POST,
                "/tasks/complete",
                &[
                    ("taskId", task_id),
                    ("commentId", comment_id),
                    ("authorSteamProfileId", profile_id),
                ],
            )
            .await?;
        Ok(())
    }

    async fn user_info(&self) -> Result<ExchangeUser, ExchangeError> {
        let user: WireUser = self.request(Method::GET, "/user", &[]).await?;
        Ok(ExchangeUser {
            uid: user.uid,
            username: user.username,
            points: user.points,
            pending_points: user.pending_points,
        })
    }
}

/// The exchange serializes ids inconsistently (numbers and strings); accept
/// both.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProfile {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(deserialize_with = "id_string")]
    steam_id: String,
    #[serde(default)]
    persona_name: Option<String>,
    #[serde(default)]
    can_receive_comment: bool,
}

impl From<WireProfile> for ExchangeProfile {
    fn from(p: WireProfile) -> Self {
        ExchangeProfile {
            id: p.id,
            platform_id: p.steam_id,
            persona_name: p.persona_name,
            can_receive_comment: p.can_receive_comment,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTask {
    #[serde(rename = "taskId", deserialize_with = "id_string")]
    task_id: String,
    #[serde(deserialize_with = "id_string")]
    target_steam_profile_id: String,
    #[serde(default)]
    target_steam_profile_name: String,
    #[serde(deserialize_with = "id_string")]
    required_comment_id: String,
    required_comment_text: String,
}

impl From<WireTask> for ExchangeTask {
    fn from(t: WireTask) -> Self {
        ExchangeTask {
            id: t.task_id,
            target_id: t.target_steam_profile_id,
            target_name: t.target_steam_profile_name,
            required_comment_id: t.required_comment_id,
            comment_text: t.required_comment_text,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    #[serde(deserialize_with = "id_string")]
    uid: String,
    username: String,
    #[serde(default)]
    points: i64,
    #[serde(default)]
    pending_points: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_task_accepts_numeric_and_string_ids() {
        let task: WireTask = serde_json::from_value(json!({
            "taskId": 4182,
            "targetSteamProfileId": "76561198000000001",
            "targetSteamProfileName": "target",
            "requiredCommentId": 17,
            "requiredCommentText": "+rep"
        }))
        .unwrap();

        let task: ExchangeTask = task.into();
        assert_eq!(task.id, "4182");
        assert_eq!(task.required_comment_id, "17");
        assert_eq!(task.target_id, "76561198000000001");
    }

    #[test]
    fn wire_profile_defaults_optional_fields() {
        let profile: WireProfile = serde_json::from_value(json!({
            "id": 99,
            "steamId": 76561198000000002u64
        }))
        .unwrap();

        let profile: ExchangeProfile = profile.into();
        assert_eq!(profile.id, "99");
        assert!(profile.persona_name.is_none());
        assert!(!profile.can_receive_comment);
    }

    #[test]
    fn missing_token_is_reported() {
        let client = ExchangeClient::new("https://rep4rep.com/pub-api".into(), None).unwrap();
        assert!(matches!(client.token(), Err(ExchangeError::MissingToken)));
        client.set_api_token("t-1");
        assert_eq!(client.token().unwrap(), "t-1");
    }
}
