use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use uuid::Uuid;
use validator::Validate;

use crate::application::events::{
    EventBus, LogLevel, OrchestratorEvent, RunStats, ShutdownSignal,
};
use crate::application::executor::TaskExecutor;
use crate::application::quota;
use crate::application::worker::{AccountWorker, WorkerHandle, WorkerRegistry, WorkerSnapshot};
use crate::domain::{Account, AccountPatch, AccountStatus, RunSettings, WorkMode};
use crate::infrastructure::{AccountStore, ExchangeError, IdentityProvider, StoreError, TaskSource};

/// Cool-down before a drained run is rescheduled from the full account list.
const RESTART_COOLDOWN: Duration = Duration::from_secs(5 * 60);
/// Poll step while waiting for workers to wind down cooperatively.
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("no accounts with a platform id are eligible to run")]
    NoEligibleAccounts,
    #[error("invalid run settings: {0}")]
    InvalidSettings(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub is_running: bool,
    pub active_workers: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub workers: Vec<WorkerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    pub total_completed: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    pub active_workers: usize,
    pub is_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountOverview {
    pub id: Uuid,
    pub login: String,
    pub platform_id: Option<String>,
    pub tasks_today: i32,
    pub last_action_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub seconds_until_reset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSyncReport {
    pub synced: usize,
    pub errors: usize,
    pub details: Vec<ProfileSyncDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSyncDetail {
    pub account_id: Uuid,
    pub login: String,
    pub outcome: ProfileSyncOutcome,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSyncOutcome {
    Synced,
    NotFound,
    Error,
}

/// Everything a strategy task needs to drive one run. Cloned into the
/// spawned task and kept by the orchestrator for out-of-band worker
/// restarts.
struct RunDriver<S, I, X> {
    store: Arc<S>,
    events: EventBus,
    registry: Arc<WorkerRegistry>,
    worker: Arc<AccountWorker<S, I, X>>,
    settings: RunSettings,
    signal: ShutdownSignal,
}

impl<S, I, X> Clone for RunDriver<S, I, X> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            events: self.events.clone(),
            registry: self.registry.clone(),
            worker: self.worker.clone(),
            settings: self.settings.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<S, I, X> RunDriver<S, I, X>
where
    S: AccountStore + 'static,
    I: IdentityProvider + 'static,
    X: TaskSource + 'static,
{
    /// Bounded admission pool: refill a slot the moment a worker exits, skip
    /// ineligible accounts instead of blocking on them, and reschedule the
    /// full list after a drain.
    async fn run_parallel(self, accounts: Vec<Account>) {
        let cap = self.settings.effective_concurrency();
        self.events.log(
            LogLevel::Info,
            format!("Starting in parallel mode for {} accounts", accounts.len()),
        );

        loop {
            let mut queue: VecDeque<Uuid> = accounts.iter().map(|a| a.id).collect();
            let mut pool: JoinSet<()> = JoinSet::new();

            loop {
                if !self.signal.is_running() {
                    break;
                }
                while pool.len() < cap {
                    let Some(account_id) = queue.pop_front() else {
                        break;
                    };
                    let Some((account, handle)) = self.admit(account_id).await else {
                        continue;
                    };
                    self.events.log(
                        LogLevel::Info,
                        format!("Worker started for account {}", account.login),
                    );
                    let worker = self.worker.clone();
                    pool.spawn(async move { worker.run(account, handle).await });
                }
                if pool.is_empty() {
                    break;
                }
                let _ = pool.join_next().await;
            }

            // Never abort workers: wait for each to observe the flags and
            // log out on its own.
            while pool.join_next().await.is_some() {}

            if !self.signal.is_running() {
                break;
            }
            self.events.log(
                LogLevel::Info,
                "All accounts processed, restarting in 5 minutes",
            );
            if !self.signal.sleep(RESTART_COOLDOWN).await {
                break;
            }
        }
    }

    /// One account at a time in list order; rate limits pause the whole pass
    /// inside the worker rather than skipping the account.
    async fn run_sequential(self, accounts: Vec<Account>) {
        self.events.log(
            LogLevel::Info,
            format!("Starting in sequential mode for {} accounts", accounts.len()),
        );
        let delay = Duration::from_secs(self.settings.task_delay_secs);

        loop {
            let total = accounts.len();
            for (index, entry) in accounts.iter().enumerate() {
                if !self.signal.is_running() {
                    break;
                }
                let Some((account, handle)) = self.admit(entry.id).await else {
                    continue;
                };
                self.events.log(
                    LogLevel::Info,
                    format!("Worker started for account {}", account.login),
                );
                self.worker.run(account, handle).await;

                if self.signal.is_running() && index + 1 < total && !self.signal.sleep(delay).await
                {
                    break;
                }
            }

            if !self.signal.is_running() {
                break;
            }
            self.events.log(
                LogLevel::Info,
                "All accounts processed, restarting in 5 minutes",
            );
            if !self.signal.sleep(RESTART_COOLDOWN).await {
                break;
            }
        }
    }

    /// Re-read the account and decide whether it may enter execution now.
    /// Errors and standing cooldowns both mean "skip, keep going".
    async fn admit(&self, account_id: Uuid) -> Option<(Account, WorkerHandle)> {
        let mut account = match self.store.get_account(account_id).await {
            Ok(account) => account,
            Err(error) => {
                self.events.log(
                    LogLevel::Error,
                    format!("Account check error {}: {}", account_id, error),
                );
                return None;
            }
        };

        let now = Utc::now();
        let counter_before = account.tasks_today;
        let eligible = quota::can_account_work(&mut account, now);
        if account.tasks_today != counter_before {
            let patch = AccountPatch {
                tasks_today: Some(account.tasks_today),
                ..AccountPatch::default()
            };
            if let Err(error) = self.store.update_account(account.id, patch).await {
                self.events.log(
                    LogLevel::Error,
                    format!(
                        "Store write failed (counter reset) for {}: {}",
                        account.login, error
                    ),
                );
            }
        }
        if !eligible {
            self.events.log(
                LogLevel::Warning,
                format!("Account {} cannot work now", account.login),
            );
            return None;
        }

        let handle = self.registry.admit(&account)?;
        Some((account, handle))
    }
}

/// Top-level coordinator: owns the worker set, the statistics, and the one
/// outbound event channel for the run.
pub struct Orchestrator<S, I, X> {
    store: Arc<S>,
    identity: Arc<I>,
    source: Arc<X>,
    events: EventBus,
    stats: Arc<RunStats>,
    registry: Arc<WorkerRegistry>,
    running: Arc<AtomicBool>,
    shutdown_tx: Mutex<watch::Sender<bool>>,
    current_run: Mutex<Option<RunDriver<S, I, X>>>,
}

impl<S, I, X> Orchestrator<S, I, X>
where
    S: AccountStore + 'static,
    I: IdentityProvider + 'static,
    X: TaskSource + 'static,
{
    pub fn new(store: Arc<S>, identity: Arc<I>, source: Arc<X>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            identity,
            source,
            events: EventBus::new(256),
            stats: Arc::new(RunStats::default()),
            registry: Arc::new(WorkerRegistry::default()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(shutdown_tx),
            current_run: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin a run. Fails when one is already in progress or when no account
    /// carries a platform id; per-account trouble never fails the call.
    pub async fn start(&self, settings: RunSettings) -> Result<(), OrchestratorError> {
        settings
            .validate()
            .map_err(|e| OrchestratorError::InvalidSettings(e.to_string()))?;

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        match self.launch(settings).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.running.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    async fn launch(&self, settings: RunSettings) -> Result<(), OrchestratorError> {
        self.stats.reset();

        let accounts = self.store.list_accounts().await?;
        self.events
            .log(LogLevel::Info, "List of accounts before filtering:");
        for account in &accounts {
            let authenticated = self.identity.is_authenticated(account.id).await;
            self.events.log(
                LogLevel::Info,
                format!(
                    "id={}, login={}, status={}, authenticated={}",
                    account.id, account.login, account.status, authenticated
                ),
            );
        }

        let eligible: Vec<Account> = accounts
            .into_iter()
            .filter(|account| account.platform_id.is_some())
            .collect();
        if eligible.is_empty() {
            self.events.log(
                LogLevel::Error,
                "No eligible accounts to start. Add at least one account with a platform id.",
            );
            return Err(OrchestratorError::NoEligibleAccounts);
        }

        self.source.set_api_token(&settings.api_token);
        self.events.log(
            LogLevel::Info,
            format!(
                "Exchange token set ({})",
                crate::infrastructure::token_fingerprint(&settings.api_token)
            ),
        );

        let (tx, rx) = watch::channel(false);
        *self.shutdown_tx.lock().expect("shutdown lock poisoned") = tx;
        let signal = ShutdownSignal::new(self.running.clone(), rx);

        let executor = Arc::new(TaskExecutor::new(
            self.store.clone(),
            self.identity.clone(),
            self.source.clone(),
            self.events.clone(),
            self.stats.clone(),
            settings.clone(),
            signal.clone(),
        ));
        let worker = Arc::new(AccountWorker::new(
            executor,
            self.store.clone(),
            self.identity.clone(),
            self.registry.clone(),
            self.events.clone(),
            settings.clone(),
            signal.clone(),
        ));
        let driver = RunDriver {
            store: self.store.clone(),
            events: self.events.clone(),
            registry: self.registry.clone(),
            worker,
            settings: settings.clone(),
            signal,
        };
        *self.current_run.lock().expect("run lock poisoned") = Some(driver.clone());

        self.events.emit(OrchestratorEvent::Started);
        self.events.log(LogLevel::Info, "Run started");

        tokio::spawn(async move {
            match settings.work_mode {
                WorkMode::Parallel => driver.run_parallel(eligible).await,
                WorkMode::Sequential => driver.run_sequential(eligible).await,
            }
        });

        Ok(())
    }

    /// Idempotent cooperative stop: flip the flag, wake every sleep, then
    /// wait for in-flight tasks to finish and workers to log out.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self
            .shutdown_tx
            .lock()
            .expect("shutdown lock poisoned")
            .send(true);
        self.registry.mark_all_inactive();

        while !self.registry.is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        *self.current_run.lock().expect("run lock poisoned") = None;
        self.events.emit(OrchestratorEvent::Stopped);
        self.events.log(LogLevel::Info, "Run stopped");
    }

    /// Stop, then close any session that survived the run.
    pub async fn shutdown(&self) {
        self.stop().await;
        if let Ok(accounts) = self.store.list_accounts().await {
            for account in accounts {
                let _ = self.identity.deauthenticate(account.id).await;
            }
        }
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            is_running: self.is_running(),
            active_workers: self.registry.count(),
            completed_tasks: self.stats.completed(),
            failed_tasks: self.stats.failed(),
            workers: self.registry.snapshot(),
        }
    }

    pub fn statistics(&self) -> RunStatistics {
        RunStatistics {
            total_completed: self.stats.completed(),
            total_failed: self.stats.failed(),
            success_rate: self.stats.success_rate(),
            active_workers: self.registry.count(),
            is_running: self.is_running(),
        }
    }

    /// Ask one worker to stand down at its next loop check.
    pub fn stop_account_worker(&self, account_id: Uuid) {
        if let Some(handle) = self.registry.get(account_id) {
            handle.deactivate();
            self.events.log(
                LogLevel::Info,
                format!("Account worker {} was asked to stop", handle.login),
            );
        }
    }

    /// Stop a worker and, when the run is still live and the account is
    /// eligible again, re-admit it outside the strategy's queue.
    pub async fn restart_account_worker(&self, account_id: Uuid) -> Result<(), OrchestratorError> {
        self.stop_account_worker(account_id);
        while self.registry.get(account_id).is_some() {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        if !self.is_running() {
            return Ok(());
        }
        let driver = self
            .current_run
            .lock()
            .expect("run lock poisoned")
            .clone();
        let Some(driver) = driver else {
            return Ok(());
        };

        if let Some((account, handle)) = driver.admit(account_id).await {
            self.events.log(
                LogLevel::Info,
                format!("Worker started for account {}", account.login),
            );
            let worker = driver.worker.clone();
            tokio::spawn(async move { worker.run(account, handle).await });
        }
        Ok(())
    }

    /// Lazily reset every account whose 24h window has elapsed. Driven on an
    /// interval by the server, harmless to call any time.
    pub async fn run_reset_sweep(&self) -> Result<usize, OrchestratorError> {
        let accounts = self.store.list_accounts().await?;
        let now = Utc::now();
        let mut reset = 0;

        for mut account in accounts {
            if quota::reset_if_due(&mut account, now) {
                let patch = AccountPatch {
                    tasks_today: Some(0),
                    ..AccountPatch::default()
                };
                match self.store.update_account(account.id, patch).await {
                    Ok(()) => reset += 1,
                    Err(error) => self.events.log(
                        LogLevel::Error,
                        format!(
                            "Store write failed (counter reset) for {}: {}",
                            account.login, error
                        ),
                    ),
                }
            }
        }

        if reset > 0 {
            self.events.emit(OrchestratorEvent::AccountsUpdated);
        }
        Ok(reset)
    }

    /// Match exchange profiles to accounts by platform id and persist the
    /// exchange-side identity onto each matched account.
    pub async fn sync_profiles(&self) -> Result<ProfileSyncReport, OrchestratorError> {
        let profiles = self.source.list_profiles().await?;
        let accounts = self.store.list_accounts().await?;

        let mut report = ProfileSyncReport {
            synced: 0,
            errors: 0,
            details: Vec::new(),
        };

        for account in accounts {
            let detail = |outcome, message: Option<String>| ProfileSyncDetail {
                account_id: account.id,
                login: account.login.clone(),
                outcome,
                message,
            };

            let Some(platform_id) = account.platform_id.clone() else {
                report.details.push(detail(
                    ProfileSyncOutcome::NotFound,
                    Some("Account has no platform id".to_string()),
                ));
                continue;
            };

            match profiles.iter().find(|p| p.platform_id == platform_id) {
                Some(profile) => {
                    let patch = AccountPatch {
                        exchange_profile_id: Some(Some(profile.id.clone())),
                        persona_name: Some(profile.persona_name.clone()),
                        ..AccountPatch::default()
                    };
                    match self.store.update_account(account.id, patch).await {
                        Ok(()) => {
                            report.synced += 1;
                            report.details.push(detail(ProfileSyncOutcome::Synced, None));
                        }
                        Err(error) => {
                            report.errors += 1;
                            report
                                .details
                                .push(detail(ProfileSyncOutcome::Error, Some(error.to_string())));
                        }
                    }
                }
                None => report.details.push(detail(
                    ProfileSyncOutcome::NotFound,
                    Some("Profile not found on the exchange".to_string()),
                )),
            }
        }

        self.events.emit(OrchestratorEvent::AccountsUpdated);
        Ok(report)
    }

    /// Read-only account listing with the status a viewer cares about:
    /// offline / completed / waiting / ready, derived from session and quota
    /// state.
    pub async fn account_overview(&self) -> Result<Vec<AccountOverview>, OrchestratorError> {
        let accounts = self.store.list_accounts().await?;
        let now = Utc::now();

        let mut overview = Vec::with_capacity(accounts.len());
        for account in accounts {
            let authenticated = self.identity.is_authenticated(account.id).await;
            overview.push(AccountOverview {
                id: account.id,
                login: account.login.clone(),
                platform_id: account.platform_id.clone(),
                tasks_today: account.tasks_today,
                last_action_at: account.last_action_at,
                status: quota::derived_status(&account, authenticated, now),
                seconds_until_reset: quota::time_until_reset(&account, now).num_seconds(),
            });
        }
        Ok(overview)
    }
}
