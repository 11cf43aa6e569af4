use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outbound events for the presentation layer. The orchestrator owns the one
/// channel; subscribers come and go freely.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Started,
    Stopped,
    TaskCompleted {
        account_id: Uuid,
        task_id: String,
        comment_id: String,
    },
    TaskFailed {
        account_id: Uuid,
        task_id: Option<String>,
        error: String,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    AccountsUpdated,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Send errors only mean nobody is listening.
    pub fn emit(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }

    /// Mirror a run log line to tracing and to subscribers.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => info!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.emit(OrchestratorEvent::Log { level, message });
    }
}

/// Process-wide task counters, reset at each start.
///
/// Atomics rather than plain integers: workers run on a multi-threaded
/// runtime and increment these concurrently.
#[derive(Default)]
pub struct RunStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

impl RunStats {
    pub fn reset(&self) {
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Completed as a percentage of all finished tasks, one decimal. 0 when
    /// nothing has finished.
    pub fn success_rate(&self) -> f64 {
        let completed = self.completed() as f64;
        let total = completed + self.failed() as f64;
        if total == 0.0 {
            return 0.0;
        }
        (completed / total * 1000.0).round() / 10.0
    }
}

/// Cooperative-cancellation handle for one run.
///
/// The running flag is the source of truth; the watch channel exists to wake
/// sleeping workers so a stop clears pending delays immediately.
#[derive(Clone)]
pub struct ShutdownSignal {
    running: Arc<AtomicBool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new(running: Arc<AtomicBool>, rx: watch::Receiver<bool>) -> Self {
        Self { running, rx }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once stop has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Sleep that a stop request interrupts. Returns false when interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}
