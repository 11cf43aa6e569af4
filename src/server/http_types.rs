use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::{AccountOverview, OrchestratorStatus, RunStatistics, WorkerSnapshot};
use crate::domain::{RunSettings, WorkMode};

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct StartRunRequest {
    #[serde(default = "default_task_delay")]
    #[schema(example = 30)]
    pub(super) task_delay_secs: u64,
    #[serde(default = "default_comment_delay")]
    #[schema(example = 5)]
    pub(super) comment_delay_secs: u64,
    #[serde(default = "default_work_mode")]
    #[schema(example = "parallel")]
    pub(super) work_mode: String,
    #[serde(default = "default_concurrency")]
    #[schema(example = 10)]
    pub(super) max_concurrent_accounts: usize,
    pub(super) api_token: String,
}

pub(super) fn default_task_delay() -> u64 {
    30
}

pub(super) fn default_comment_delay() -> u64 {
    5
}

pub(super) fn default_work_mode() -> String {
    "parallel".to_string()
}

pub(super) fn default_concurrency() -> usize {
    10
}

impl StartRunRequest {
    pub(super) fn into_settings(self, work_mode: WorkMode) -> RunSettings {
        RunSettings {
            task_delay_secs: self.task_delay_secs,
            comment_delay_secs: self.comment_delay_secs,
            work_mode,
            max_concurrent_accounts: self.max_concurrent_accounts,
            api_token: self.api_token,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub(super) struct ChallengeAnswerRequest {
    pub(super) code: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct WorkerResponse {
    pub(super) account_id: Uuid,
    pub(super) login: String,
    pub(super) tasks_processed: u32,
    pub(super) last_activity: chrono::DateTime<chrono::Utc>,
}

impl From<WorkerSnapshot> for WorkerResponse {
    fn from(snapshot: WorkerSnapshot) -> Self {
        Self {
            account_id: snapshot.account_id,
            login: snapshot.login,
            tasks_processed: snapshot.tasks_processed,
            last_activity: snapshot.last_activity,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct StatusResponse {
    pub(super) is_running: bool,
    pub(super) active_workers: usize,
    pub(super) completed_tasks: u64,
    pub(super) failed_tasks: u64,
    pub(super) workers: Vec<WorkerResponse>,
}

impl From<OrchestratorStatus> for StatusResponse {
    fn from(status: OrchestratorStatus) -> Self {
        Self {
            is_running: status.is_running,
            active_workers: status.active_workers,
            completed_tasks: status.completed_tasks,
            failed_tasks: status.failed_tasks,
            workers: status.workers.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct StatisticsResponse {
    pub(super) total_completed: u64,
    pub(super) total_failed: u64,
    pub(super) success_rate: f64,
    pub(super) active_workers: usize,
    pub(super) is_running: bool,
}

impl From<RunStatistics> for StatisticsResponse {
    fn from(stats: RunStatistics) -> Self {
        Self {
            total_completed: stats.total_completed,
            total_failed: stats.total_failed,
            success_rate: stats.success_rate,
            active_workers: stats.active_workers,
            is_running: stats.is_running,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct AccountResponse {
    pub(super) id: Uuid,
    pub(super) login: String,
    pub(super) platform_id: Option<String>,
    pub(super) tasks_today: i32,
    #[schema(format = "date-time")]
    pub(super) last_action_at: Option<chrono::DateTime<chrono::Utc>>,
    pub(super) status: String,
    pub(super) seconds_until_reset: i64,
}

impl From<AccountOverview> for AccountResponse {
    fn from(overview: AccountOverview) -> Self {
        Self {
            id: overview.id,
            login: overview.login,
            platform_id: overview.platform_id,
            tasks_today: overview.tasks_today,
            last_action_at: overview.last_action_at,
            status: overview.status.to_string(),
            seconds_until_reset: overview.seconds_until_reset,
        }
    }
}
