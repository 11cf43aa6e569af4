use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::application::events::{EventBus, LogLevel, OrchestratorEvent, RunStats, ShutdownSignal};
use crate::application::quota;
use crate::application::retry::{classify, ExecutionError, FailureKind};
use crate::application::worker::WorkerHandle;
use crate::domain::{
    Account, AccountPatch, AccountStatus, ExchangeProfile, ExchangeTask, RunSettings,
    TaskLogEntry, WorkMode,
};
use crate::infrastructure::{AccountStore, IdentityProvider, Session, TaskSource};

/// Wait for a freshly registered profile to become visible on the exchange.
const PROFILE_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Result of one pass over an account's task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran to its natural end (possibly executing nothing).
    Completed { executed: u32 },
    /// Remote backpressure ended the cycle; handling depends on work mode.
    RateLimited,
    /// A transient failure ended the cycle; the worker backs off harder.
    Faulted,
}

enum Disposition {
    SkipTask,
    RateLimited,
    Faulted,
}

/// Executes tasks for one account at a time: resolve the exchange profile,
/// ensure a live session, post, acknowledge, record.
pub struct TaskExecutor<S, I, X> {
    store: Arc<S>,
    identity: Arc<I>,
    source: Arc<X>,
    events: EventBus,
    stats: Arc<RunStats>,
    settings: RunSettings,
    signal: ShutdownSignal,
}

impl<S, I, X> TaskExecutor<S, I, X>
where
    S: AccountStore,
    I: IdentityProvider,
    X: TaskSource,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        identity: Arc<I>,
        source: Arc<X>,
        events: EventBus,
        stats: Arc<RunStats>,
        settings: RunSettings,
        signal: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            identity,
            source,
            events,
            stats,
            settings,
            signal,
        }
    }

    /// One full pass over the tasks currently offered for `account`.
    pub async fn run_cycle(&self, account: &mut Account, handle: &WorkerHandle) -> CycleOutcome {
        let profile = match self.ensure_profile(account).await {
            Ok(Some(profile)) => profile,
            Ok(None) => return CycleOutcome::Completed { executed: 0 },
            Err(error) => return self.cycle_error(account, handle, error).await,
        };

        if let Err(error) = self.ensure_session(account).await {
            return self.cycle_error(account, handle, error).await;
        }

        if quota::reset_if_due(account, Utc::now()) {
            let patch = AccountPatch {
                tasks_today: Some(0),
                ..AccountPatch::default()
            };
            self.persist(account, patch, "counter reset").await;
        }

        let tasks = match self.source.list_tasks(&profile.id).await {
            Ok(tasks) => tasks,
            Err(error) => return self.cycle_error(account, handle, error.into()).await,
        };
        if tasks.is_empty() {
            self.events.log(
                LogLevel::Info,
                format!("No available tasks for account {}", account.login),
            );
            return CycleOutcome::Completed { executed: 0 };
        }

        let mut executed = 0u32;
        for task in &tasks {
            if !self.signal.is_running() || !handle.is_active() {
                break;
            }
            if quota::has_reached_limit(account) {
                self.events.log(
                    LogLevel::Info,
                    format!("Task limit reached for {}", account.login),
                );
                break;
            }

            match self.execute(account, &profile, task).await {
                Ok(true) => executed += 1,
                Ok(false) => {}
                Err(error) => {
                    match self.handle_failure(account, handle, Some(task), error).await {
                        Disposition::SkipTask => continue,
                        Disposition::RateLimited => return CycleOutcome::RateLimited,
                        Disposition::Faulted => return CycleOutcome::Faulted,
                    }
                }
            }
        }

        CycleOutcome::Completed { executed }
    }

    /// Steps 3-6 for a single task. Returns false when the comment never
    /// materialized and the task was therefore not acknowledged.
    async fn execute(
        &self,
        account: &mut Account,
        profile: &ExchangeProfile,
        task: &ExchangeTask,
    ) -> Result<bool, ExecutionError> {
        self.events.log(
            LogLevel::Info,
            format!(
                "Executing task for {}: comment for {}",
                account.login, task.target_name
            ),
        );

        let comment_id = self
            .identity
            .post_comment(account.id, &task.target_id, &task.comment_text)
            .await?;

        let Some(comment_id) = comment_id.filter(|id| !id.is_empty()) else {
            self.events.log(
                LogLevel::Error,
                "Comment was not posted, completion will not be acknowledged",
            );
            return Ok(false);
        };

        // Rate-shaping grace period the exchange requires between the comment
        // and its acknowledgement. Not interruptible: a posted comment must
        // be acknowledged even during shutdown.
        tokio::time::sleep(Duration::from_secs(self.settings.comment_delay_secs)).await;

        self.source
            .acknowledge_task(&task.id, &task.required_comment_id, &profile.id)
            .await?;

        let now = Utc::now();
        account.last_action_at = Some(now);
        account.tasks_today += 1;
        let patch = AccountPatch {
            tasks_today: Some(account.tasks_today),
            last_action_at: Some(Some(now)),
            ..AccountPatch::default()
        };
        self.persist(account, patch, "quota update").await;
        self.append_log(account, TaskLogEntry::completed(account.id, task, comment_id.clone()))
            .await;

        self.stats.record_completed();
        self.events.emit(OrchestratorEvent::TaskCompleted {
            account_id: account.id,
            task_id: task.id.clone(),
            comment_id: comment_id.clone(),
        });
        self.events.log(
            LogLevel::Success,
            format!("Task completed for {} (comment {})", account.login, comment_id),
        );
        Ok(true)
    }

    /// Resolve the account's exchange profile, registering it on demand.
    /// `None` ends the cycle without treating it as a failure.
    async fn ensure_profile(
        &self,
        account: &Account,
    ) -> Result<Option<ExchangeProfile>, ExecutionError> {
        let Some(platform_id) = account.platform_id.clone() else {
            self.events.log(
                LogLevel::Error,
                format!("Account {} has no platform id", account.login),
            );
            return Ok(None);
        };

        let profiles = self.source.list_profiles().await?;
        if let Some(profile) = profiles.into_iter().find(|p| p.platform_id == platform_id) {
            return Ok(Some(profile));
        }

        self.events.log(
            LogLevel::Info,
            format!(
                "Profile for account {} not found on the exchange, registering",
                account.login
            ),
        );
        if let Err(error) = self.source.register_profile(&platform_id).await {
            self.events.log(
                LogLevel::Error,
                format!("Failed to register profile for {}: {}", account.login, error),
            );
            return Ok(None);
        }
        self.events.log(
            LogLevel::Success,
            format!("Profile for {} registered on the exchange", account.login),
        );

        if !self.signal.sleep(PROFILE_SETTLE_DELAY).await {
            return Ok(None);
        }

        let profiles = self.source.list_profiles().await?;
        match profiles.into_iter().find(|p| p.platform_id == platform_id) {
            Some(profile) => Ok(Some(profile)),
            None => {
                self.events.log(
                    LogLevel::Error,
                    format!(
                        "Profile for {} still missing after registration",
                        account.login
                    ),
                );
                Ok(None)
            }
        }
    }

    async fn ensure_session(&self, account: &mut Account) -> Result<(), ExecutionError> {
        if self.identity.is_authenticated(account.id).await {
            return Ok(());
        }

        self.events.log(
            LogLevel::Info,
            format!("Authorizing account {}", account.login),
        );
        let session = self.identity.authenticate(account).await?;
        let patch = apply_session(account, &session);
        self.persist(account, patch, "session refresh").await;
        Ok(())
    }

    async fn cycle_error(
        &self,
        account: &mut Account,
        handle: &WorkerHandle,
        error: ExecutionError,
    ) -> CycleOutcome {
        match self.handle_failure(account, handle, None, error).await {
            Disposition::RateLimited => CycleOutcome::RateLimited,
            Disposition::SkipTask | Disposition::Faulted => CycleOutcome::Faulted,
        }
    }

    /// Route a classified failure. RateLimited in parallel mode freezes the
    /// account's quota for the rest of the window; in sequential mode the
    /// caller pauses the whole run instead.
    async fn handle_failure(
        &self,
        account: &mut Account,
        handle: &WorkerHandle,
        task: Option<&ExchangeTask>,
        error: ExecutionError,
    ) -> Disposition {
        match classify(&error) {
            FailureKind::PermissionDenied => {
                self.events.log(
                    LogLevel::Warning,
                    format!(
                        "Account {} cannot comment on this target, skipping task",
                        account.login
                    ),
                );
                Disposition::SkipTask
            }
            FailureKind::RateLimited => {
                self.stats.record_failed();
                self.events.emit(OrchestratorEvent::TaskFailed {
                    account_id: account.id,
                    task_id: task.map(|t| t.id.clone()),
                    error: error.to_string(),
                });
                if let Some(task) = task {
                    self.append_log(account, TaskLogEntry::failed(account.id, task)).await;
                }

                if self.settings.work_mode == WorkMode::Sequential {
                    self.events.log(
                        LogLevel::Warning,
                        "Rate limited by the remote service, pausing the run",
                    );
                    return Disposition::RateLimited;
                }

                let now = Utc::now();
                account.tasks_today = quota::DAILY_TASK_LIMIT;
                account.last_action_at = Some(now);
                let patch = AccountPatch {
                    tasks_today: Some(account.tasks_today),
                    last_action_at: Some(Some(now)),
                    ..AccountPatch::default()
                };
                self.persist(account, patch, "rate-limit quota freeze").await;

                handle.deactivate();
                self.events.log(
                    LogLevel::Warning,
                    format!(
                        "Account {} hit the posting frequency limit, skipping for 24h",
                        account.login
                    ),
                );
                self.events.emit(OrchestratorEvent::AccountsUpdated);
                Disposition::RateLimited
            }
            FailureKind::Transient => {
                self.stats.record_failed();
                self.events.log(
                    LogLevel::Error,
                    format!("Task execution error for {}: {}", account.login, error),
                );
                self.events.emit(OrchestratorEvent::TaskFailed {
                    account_id: account.id,
                    task_id: task.map(|t| t.id.clone()),
                    error: error.to_string(),
                });
                if let Some(task) = task {
                    self.append_log(account, TaskLogEntry::failed(account.id, task)).await;
                }
                Disposition::Faulted
            }
        }
    }

    /// A store failure must not desynchronize the run: log it and keep the
    /// in-memory state authoritative for the rest of the run.
    async fn persist(&self, account: &Account, patch: AccountPatch, what: &str) {
        if let Err(error) = self.store.update_account(account.id, patch).await {
            self.events.log(
                LogLevel::Error,
                format!(
                    "Store write failed ({what}) for {}: {}; keeping in-memory state",
                    account.login, error
                ),
            );
        }
    }

    async fn append_log(&self, account: &Account, entry: TaskLogEntry) {
        if let Err(error) = self.store.append_task_log(entry).await {
            self.events.log(
                LogLevel::Error,
                format!("Task log append failed for {}: {}", account.login, error),
            );
        }
    }
}

/// Fold a fresh session's durable credentials into the account and produce
/// the matching store patch.
pub(crate) fn apply_session(account: &mut Account, session: &Session) -> AccountPatch {
    let mut patch = AccountPatch::status(AccountStatus::Ready);
    account.status = AccountStatus::Ready;

    if let Some(platform_id) = &session.platform_id {
        account.platform_id = Some(platform_id.clone());
        patch.platform_id = Some(Some(platform_id.clone()));
    }
    if let Some(token) = &session.refresh_token {
        account.auth_token = Some(token.clone());
        patch.auth_token = Some(Some(token.clone()));
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::EventBus;
    use crate::infrastructure::{
        IdentityError, MockAccountStore, MockIdentityProvider, MockTaskSource,
    };
    use std::sync::atomic::AtomicBool;
    use tokio::sync::watch;

    fn test_settings() -> RunSettings {
        RunSettings {
            task_delay_secs: 0,
            comment_delay_secs: 0,
            api_token: "token".to_string(),
            ..RunSettings::default()
        }
    }

    fn test_signal() -> ShutdownSignal {
        let (_tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the test's lifetime.
        std::mem::forget(_tx);
        ShutdownSignal::new(Arc::new(AtomicBool::new(true)), rx)
    }

    fn test_account() -> Account {
        Account::new("worker1".to_string(), Some("765".to_string()))
    }

    fn test_profile() -> ExchangeProfile {
        ExchangeProfile {
            id: "p-1".to_string(),
            platform_id: "765".to_string(),
            persona_name: None,
            can_receive_comment: true,
        }
    }

    fn task(id: &str, target: &str) -> ExchangeTask {
        ExchangeTask {
            id: id.to_string(),
            target_id: target.to_string(),
            target_name: format!("name-{target}"),
            required_comment_id: "rc-1".to_string(),
            comment_text: "+rep".to_string(),
        }
    }

    fn executor(
        store: MockAccountStore,
        identity: MockIdentityProvider,
        source: MockTaskSource,
        settings: RunSettings,
        stats: Arc<RunStats>,
        events: EventBus,
    ) -> TaskExecutor<MockAccountStore, MockIdentityProvider, MockTaskSource> {
        TaskExecutor::new(
            Arc::new(store),
            Arc::new(identity),
            Arc::new(source),
            events,
            stats,
            settings,
            test_signal(),
        )
    }

    #[tokio::test]
    async fn permission_denied_skips_only_the_refused_task() {
        let mut store = MockAccountStore::new();
        store.expect_update_account().returning(|_, _| Ok(()));
        store.expect_append_task_log().returning(|_| Ok(()));

        let mut identity = MockIdentityProvider::new();
        identity.expect_is_authenticated().returning(|_| true);
        identity
            .expect_post_comment()
            .withf(|_, target, _| target == "t1")
            .returning(|_, _, _| {
                Err(IdentityError::ActionRejected(
                    "The settings on this profile do not allow you to add comments".into(),
                ))
            });
        identity
            .expect_post_comment()
            .withf(|_, target, _| target == "t2")
            .returning(|_, _, _| Ok(Some("c-2".to_string())));

        let mut source = MockTaskSource::new();
        let profile = test_profile();
        source
            .expect_list_profiles()
            .returning(move || Ok(vec![profile.clone()]));
        source
            .expect_list_tasks()
            .returning(|_| Ok(vec![task("1", "t1"), task("2", "t2")]));
        source
            .expect_acknowledge_task()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let stats = Arc::new(RunStats::default());
        let exec = executor(
            store,
            identity,
            source,
            test_settings(),
            stats.clone(),
            EventBus::new(64),
        );

        let mut account = test_account();
        let handle = WorkerHandle::new(account.id, account.login.clone());
        let outcome = exec.run_cycle(&mut account, &handle).await;

        assert_eq!(outcome, CycleOutcome::Completed { executed: 1 });
        assert_eq!(account.tasks_today, 1);
        assert_eq!(stats.completed(), 1);
        // A refusal from the target is not a run failure.
        assert_eq!(stats.failed(), 0);
    }

    #[tokio::test]
    async fn missing_comment_handle_means_no_acknowledgement() {
        let mut store = MockAccountStore::new();
        store.expect_update_account().returning(|_, _| Ok(()));

        let mut identity = MockIdentityProvider::new();
        identity.expect_is_authenticated().returning(|_| true);
        identity
            .expect_post_comment()
            .returning(|_, _, _| Ok(None));

        let mut source = MockTaskSource::new();
        let profile = test_profile();
        source
            .expect_list_profiles()
            .returning(move || Ok(vec![profile.clone()]));
        source
            .expect_list_tasks()
            .returning(|_| Ok(vec![task("1", "t1")]));
        source.expect_acknowledge_task().times(0);

        let stats = Arc::new(RunStats::default());
        let exec = executor(
            store,
            identity,
            source,
            test_settings(),
            stats.clone(),
            EventBus::new(64),
        );

        let mut account = test_account();
        let handle = WorkerHandle::new(account.id, account.login.clone());
        let outcome = exec.run_cycle(&mut account, &handle).await;

        assert_eq!(outcome, CycleOutcome::Completed { executed: 0 });
        assert_eq!(account.tasks_today, 0);
        assert_eq!(stats.completed(), 0);
    }

    #[tokio::test]
    async fn rate_limit_in_parallel_mode_freezes_the_quota() {
        let mut store = MockAccountStore::new();
        store.expect_update_account().returning(|_, _| Ok(()));
        store.expect_append_task_log().returning(|_| Ok(()));

        let mut identity = MockIdentityProvider::new();
        identity.expect_is_authenticated().returning(|_| true);
        identity.expect_post_comment().returning(|_, _, _| {
            Err(IdentityError::ActionRejected(
                "You've been posting too frequently, and can't make another post right now".into(),
            ))
        });

        let mut source = MockTaskSource::new();
        let profile = test_profile();
        source
            .expect_list_profiles()
            .returning(move || Ok(vec![profile.clone()]));
        source
            .expect_list_tasks()
            .returning(|_| Ok(vec![task("1", "t1"), task("2", "t2")]));

        let stats = Arc::new(RunStats::default());
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let exec = executor(
            store,
            identity,
            source,
            test_settings(),
            stats.clone(),
            events,
        );

        let mut account = test_account();
        let handle = WorkerHandle::new(account.id, account.login.clone());
        let outcome = exec.run_cycle(&mut account, &handle).await;

        assert_eq!(outcome, CycleOutcome::RateLimited);
        assert_eq!(account.tasks_today, quota::DAILY_TASK_LIMIT);
        assert!(account.last_action_at.is_some());
        assert!(!handle.is_active());
        assert_eq!(stats.failed(), 1);

        let mut saw_accounts_updated = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, OrchestratorEvent::AccountsUpdated) {
                saw_accounts_updated = true;
            }
        }
        assert!(saw_accounts_updated);
    }

    #[tokio::test]
    async fn rate_limit_in_sequential_mode_leaves_the_quota_alone() {
        let mut store = MockAccountStore::new();
        store.expect_update_account().returning(|_, _| Ok(()));
        store.expect_append_task_log().returning(|_| Ok(()));

        let mut identity = MockIdentityProvider::new();
        identity.expect_is_authenticated().returning(|_| true);
        identity.expect_post_comment().returning(|_, _, _| {
            Err(IdentityError::ActionRejected("Too Many Requests".into()))
        });

        let mut source = MockTaskSource::new();
        let profile = test_profile();
        source
            .expect_list_profiles()
            .returning(move || Ok(vec![profile.clone()]));
        source
            .expect_list_tasks()
            .returning(|_| Ok(vec![task("1", "t1")]));

        let settings = RunSettings {
            work_mode: WorkMode::Sequential,
            ..test_settings()
        };
        let stats = Arc::new(RunStats::default());
        let exec = executor(store, identity, source, settings, stats.clone(), EventBus::new(64));

        let mut account = test_account();
        let handle = WorkerHandle::new(account.id, account.login.clone());
        let outcome = exec.run_cycle(&mut account, &handle).await;

        assert_eq!(outcome, CycleOutcome::RateLimited);
        assert_eq!(account.tasks_today, 0);
        assert!(handle.is_active());
    }

    #[tokio::test]
    async fn unresolvable_profile_ends_the_cycle_quietly() {
        let store = MockAccountStore::new();
        let identity = MockIdentityProvider::new();

        let mut source = MockTaskSource::new();
        source.expect_list_profiles().returning(|| Ok(vec![]));
        source.expect_register_profile().returning(|_| Ok(()));
        source.expect_list_tasks().times(0);

        let stats = Arc::new(RunStats::default());
        let exec = executor(
            store,
            identity,
            source,
            test_settings(),
            stats.clone(),
            EventBus::new(64),
        );

        let mut account = test_account();
        let handle = WorkerHandle::new(account.id, account.login.clone());
        let outcome = exec.run_cycle(&mut account, &handle).await;

        assert_eq!(outcome, CycleOutcome::Completed { executed: 0 });
        assert_eq!(stats.failed(), 0);
    }

    #[test]
    fn session_credentials_fold_into_the_account() {
        let mut account = test_account();
        account.platform_id = None;

        let session = Session {
            platform_id: Some("76561198".to_string()),
            refresh_token: Some("rt-1".to_string()),
        };
        let patch = apply_session(&mut account, &session);

        assert_eq!(account.platform_id.as_deref(), Some("76561198"));
        assert_eq!(account.auth_token.as_deref(), Some("rt-1"));
        assert_eq!(account.status, AccountStatus::Ready);
        assert_eq!(patch.platform_id, Some(Some("76561198".to_string())));
        assert_eq!(patch.auth_token, Some(Some("rt-1".to_string())));
    }
}
