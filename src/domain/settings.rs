use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// Hard ceiling on concurrently active account workers, regardless of what a
/// caller asks for.
pub const MAX_CONCURRENT_ACCOUNTS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    Parallel,
    Sequential,
}

/// Immutable snapshot of the knobs for one run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RunSettings {
    /// Delay between task cycles of one account, and between accounts in
    /// sequential mode.
    #[validate(range(max = 86_400))]
    pub task_delay_secs: u64,
    /// Grace period between posting a comment and acknowledging the task.
    #[validate(range(max = 3_600))]
    pub comment_delay_secs: u64,
    pub work_mode: WorkMode,
    /// Requested worker cap; clamped to `[1, MAX_CONCURRENT_ACCOUNTS]`.
    pub max_concurrent_accounts: usize,
    /// Exchange API credential for this run.
    #[validate(length(min = 1))]
    pub api_token: String,
}

impl RunSettings {
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_accounts.clamp(1, MAX_CONCURRENT_ACCOUNTS)
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            task_delay_secs: 30,
            comment_delay_secs: 5,
            work_mode: WorkMode::Parallel,
            max_concurrent_accounts: MAX_CONCURRENT_ACCOUNTS,
            api_token: String::new(),
        }
    }
}
