use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// One unit of remote-assigned work: post a comment on `target_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeTask {
    pub id: String,
    pub target_id: String,
    pub target_name: String,
    pub required_comment_id: String,
    pub comment_text: String,
}

/// A profile registered on the exchange, matched to a local account by
/// `platform_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeProfile {
    pub id: String,
    pub platform_id: String,
    pub persona_name: Option<String>,
    pub can_receive_comment: bool,
}

/// Exchange user info, used to validate an API token and surface balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeUser {
    pub uid: String,
    pub username: String,
    pub points: i64,
    pub pending_points: i64,
}

/// Append-only outcome record written after each executed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub account_id: Uuid,
    pub task_id: String,
    pub target_id: String,
    pub comment_id: Option<String>,
    pub status: TaskLogStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskLogStatus {
    Completed,
    Failed,
}

impl TaskLogEntry {
    pub fn completed(account_id: Uuid, task: &ExchangeTask, comment_id: String) -> Self {
        Self {
            account_id,
            task_id: task.id.clone(),
            target_id: task.target_id.clone(),
            comment_id: Some(comment_id),
            status: TaskLogStatus::Completed,
            created_at: Utc::now(),
        }
    }

    pub fn failed(account_id: Uuid, task: &ExchangeTask) -> Self {
        Self {
            account_id,
            task_id: task.id.clone(),
            target_id: task.target_id.clone(),
            comment_id: None,
            status: TaskLogStatus::Failed,
            created_at: Utc::now(),
        }
    }
}
