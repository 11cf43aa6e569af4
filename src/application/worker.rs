use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::application::events::{EventBus, LogLevel, ShutdownSignal};
use crate::application::executor::{apply_session, CycleOutcome, TaskExecutor};
use crate::application::quota;
use crate::domain::{Account, AccountPatch, AccountStatus, RunSettings, WorkMode};
use crate::infrastructure::{AccountStore, IdentityProvider, TaskSource};

/// Whole-run pause after remote backpressure in sequential mode.
pub(crate) const RATE_LIMIT_PAUSE: Duration = Duration::from_secs(5 * 60);

/// Live execution context for one account during one run. The flags are
/// shared with the running loop, so deactivation from outside is observed at
/// the next loop check.
#[derive(Clone)]
pub struct WorkerHandle {
    pub account_id: Uuid,
    pub login: String,
    active: Arc<AtomicBool>,
    tasks_processed: Arc<AtomicU32>,
    last_activity_ms: Arc<AtomicI64>,
}

impl WorkerHandle {
    pub fn new(account_id: Uuid, login: String) -> Self {
        Self {
            account_id,
            login,
            active: Arc::new(AtomicBool::new(true)),
            tasks_processed: Arc::new(AtomicU32::new(0)),
            last_activity_ms: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn record_progress(&self, executed: u32) {
        self.tasks_processed.fetch_add(executed, Ordering::SeqCst);
        self.touch();
    }

    pub fn tasks_processed(&self) -> u32 {
        self.tasks_processed.load(Ordering::SeqCst)
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub account_id: Uuid,
    pub login: String,
    pub tasks_processed: u32,
    pub last_activity: DateTime<Utc>,
}

/// The orchestrator's set of live workers. At most one per account id.
#[derive(Default)]
pub struct WorkerRegistry {
    inner: RwLock<HashMap<Uuid, WorkerHandle>>,
}

impl WorkerRegistry {
    /// Admit an account, returning its fresh handle. A no-op (`None`) when a
    /// live worker already exists for it.
    pub fn admit(&self, account: &Account) -> Option<WorkerHandle> {
        let mut inner = self.inner.write().expect("worker registry poisoned");
        if inner.contains_key(&account.id) {
            return None;
        }
        let handle = WorkerHandle::new(account.id, account.login.clone());
        inner.insert(account.id, handle.clone());
        Some(handle)
    }

    pub fn remove(&self, account_id: Uuid) -> Option<WorkerHandle> {
        self.inner
            .write()
            .expect("worker registry poisoned")
            .remove(&account_id)
    }

    pub fn get(&self, account_id: Uuid) -> Option<WorkerHandle> {
        self.inner
            .read()
            .expect("worker registry poisoned")
            .get(&account_id)
            .cloned()
    }

    pub fn mark_all_inactive(&self) {
        for handle in self.inner.read().expect("worker registry poisoned").values() {
            handle.deactivate();
        }
    }

    pub fn count(&self) -> usize {
        self.inner.read().expect("worker registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.inner
            .read()
            .expect("worker registry poisoned")
            .values()
            .map(|handle| WorkerSnapshot {
                account_id: handle.account_id,
                login: handle.login.clone(),
                tasks_processed: handle.tasks_processed(),
                last_activity: handle.last_activity(),
            })
            .collect()
    }
}

/// Owns one account's lifecycle for the run: authorize, cycle over tasks,
/// always log out on the way down.
pub struct AccountWorker<S, I, X> {
    executor: Arc<TaskExecutor<S, I, X>>,
    store: Arc<S>,
    identity: Arc<I>,
    registry: Arc<WorkerRegistry>,
    events: EventBus,
    settings: RunSettings,
    signal: ShutdownSignal,
}

impl<S, I, X> AccountWorker<S, I, X>
where
    S: AccountStore,
    I: IdentityProvider,
    X: TaskSource,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<TaskExecutor<S, I, X>>,
        store: Arc<S>,
        identity: Arc<I>,
        registry: Arc<WorkerRegistry>,
        events: EventBus,
        settings: RunSettings,
        signal: ShutdownSignal,
    ) -> Self {
        Self {
            executor,
            store,
            identity,
            registry,
            events,
            settings,
            signal,
        }
    }

    /// Run the account to its natural end. Deauthentication and registry
    /// removal happen on every exit path, including errors.
    pub async fn run(&self, mut account: Account, handle: WorkerHandle) {
        if self.authorize(&mut account).await {
            account.status = AccountStatus::Working;
            self.persist(&account, AccountPatch::status(AccountStatus::Working), "status")
                .await;

            match self.settings.work_mode {
                WorkMode::Parallel => self.drive_parallel(&mut account, &handle).await,
                WorkMode::Sequential => self.drive_sequential(&mut account, &handle).await,
            }
        }

        self.finish(&account).await;
    }

    async fn drive_parallel(&self, account: &mut Account, handle: &WorkerHandle) {
        let delay = Duration::from_secs(self.settings.task_delay_secs);

        loop {
            if !self.signal.is_running() || !handle.is_active() {
                break;
            }

            match self.executor.run_cycle(account, handle).await {
                CycleOutcome::Completed { executed } => {
                    handle.record_progress(executed);
                    if quota::has_reached_limit(account) {
                        self.events.log(
                            LogLevel::Info,
                            format!("Account {} reached daily limit", account.login),
                        );
                        break;
                    }
                    if !self.signal.sleep(delay).await {
                        break;
                    }
                }
                // Quota already frozen and the handle deactivated; nothing
                // left to do here for 24h.
                CycleOutcome::RateLimited => break,
                CycleOutcome::Faulted => {
                    handle.touch();
                    if !self.signal.sleep(delay * 2).await {
                        break;
                    }
                }
            }
        }
    }

    /// One pass per account; remote backpressure pauses the whole run and
    /// retries the same account rather than skipping it.
    async fn drive_sequential(&self, account: &mut Account, handle: &WorkerHandle) {
        loop {
            if !self.signal.is_running() || !handle.is_active() {
                break;
            }

            match self.executor.run_cycle(account, handle).await {
                CycleOutcome::RateLimited => {
                    self.events.log(
                        LogLevel::Warning,
                        format!(
                            "Pausing the run for 5 minutes before retrying {}",
                            account.login
                        ),
                    );
                    if !self.signal.sleep(RATE_LIMIT_PAUSE).await {
                        break;
                    }
                }
                CycleOutcome::Completed { executed } => {
                    handle.record_progress(executed);
                    break;
                }
                CycleOutcome::Faulted => break,
            }
        }
    }

    async fn authorize(&self, account: &mut Account) -> bool {
        if self.identity.is_authenticated(account.id).await {
            return true;
        }

        self.events.log(
            LogLevel::Info,
            format!("Authorizing account {}", account.login),
        );
        account.status = AccountStatus::Authorizing;
        self.persist(account, AccountPatch::status(AccountStatus::Authorizing), "status")
            .await;

        match self.identity.authenticate(account).await {
            Ok(session) => {
                let patch = apply_session(account, &session);
                self.persist(account, patch, "session open").await;
                true
            }
            Err(error) => {
                self.events.log(
                    LogLevel::Error,
                    format!("Account {} authorization error: {}", account.login, error),
                );
                account.status = AccountStatus::Error;
                let mut patch = AccountPatch::status(AccountStatus::Error);
                // A replaced session means the stored token is dead; drop it
                // so the next login starts from credentials.
                if error.to_string().contains("LogonSessionReplaced") {
                    account.auth_token = None;
                    patch.auth_token = Some(None);
                }
                self.persist(account, patch, "auth failure").await;
                false
            }
        }
    }

    async fn finish(&self, account: &Account) {
        if let Err(error) = self.identity.deauthenticate(account.id).await {
            self.events.log(
                LogLevel::Warning,
                format!("Logout failed for {}: {}", account.login, error),
            );
        }
        self.persist(account, AccountPatch::status(AccountStatus::Offline), "logout")
            .await;
        self.registry.remove(account.id);
        self.events.log(
            LogLevel::Info,
            format!(
                "Worker for account {} finished and account logged out",
                account.login
            ),
        );
    }

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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(login: &str) -> Account {
        Account::new(login.to_string(), Some("765".to_string()))
    }

    #[test]
    fn registry_admits_an_account_once() {
        let registry = WorkerRegistry::default();
        let account = account("a");

        let handle = registry.admit(&account).expect("first admit");
        assert!(handle.is_active());
        assert!(registry.admit(&account).is_none());
        assert_eq!(registry.count(), 1);

        registry.remove(account.id);
        assert!(registry.admit(&account).is_some());
    }

    #[test]
    fn mark_all_inactive_reaches_live_handles() {
        let registry = WorkerRegistry::default();
        let first = registry.admit(&account("a")).unwrap();
        let second = registry.admit(&account("b")).unwrap();

        registry.mark_all_inactive();
        assert!(!first.is_active());
        assert!(!second.is_active());
        // Deactivation does not remove; the loops do that as they exit.
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn snapshot_reflects_progress() {
        let registry = WorkerRegistry::default();
        let handle = registry.admit(&account("a")).unwrap();
        handle.record_progress(3);
        handle.record_progress(2);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].tasks_processed, 5);
        assert_eq!(snapshot[0].login, "a");
    }
}
