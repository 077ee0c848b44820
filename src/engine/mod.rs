//! Test lifecycle engine.
//!
//! Owns the table of currently running tests, the admission queue and
//! concurrency cap, the per-test sampling loops, the statistics
//! accumulator, and graceful shutdown. One `Engine` instance is injected
//! (via `Arc`) wherever it is needed; there are no ambient singletons.

pub mod monitor;
pub mod queue;
pub mod runner;
pub mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, Event};
use crate::config::EngineConfig;
use crate::probes::{SampleSource, TestConfig, TestStatus};
use crate::storage::ResultStore;

use self::queue::PendingQueue;
use self::stats::EngineStats;
pub use self::stats::StatsSnapshot;

/// Outcome of a successful admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The test was registered and its sampling loop is running.
    Started,
    /// The cap is reached; the test waits in the admission queue.
    Queued { position: usize },
}

/// Synchronous admission failures. No engine state is mutated when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("test {test_id} is already registered")]
    Duplicate { test_id: String },

    #[error("admission queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Opaque cancellation token for a spawned task. The only operation the
/// engine relies on is `cancel`.
pub struct TaskHandle {
    inner: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(inner: JoinHandle<()>) -> Self {
        Self { inner }
    }

    pub fn cancel(&self) {
        self.inner.abort();
    }
}

/// A test resident in the running-table. In-memory only; status changes
/// are mirrored to the result store.
pub(crate) struct RunningTest {
    pub config: TestConfig,
    pub started_at: DateTime<Utc>,
    pub started_instant: Instant,
    pub last_update: DateTime<Utc>,
    pub handle: Option<TaskHandle>,
}

/// Running-table, admission queue, and counters, guarded together so
/// admission checks and promotions are atomic.
pub(crate) struct EngineState {
    pub running: HashMap<String, RunningTest>,
    pub queue: PendingQueue,
    pub stats: EngineStats,
}

pub(crate) struct EngineInner {
    pub state: RwLock<EngineState>,
    pub max_concurrent: AtomicUsize,
    pub shutting_down: AtomicBool,
    pub store: Arc<dyn ResultStore>,
    pub source: Arc<dyn SampleSource>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub config: EngineConfig,
}

/// The test lifecycle engine.
pub struct Engine {
    inner: Arc<EngineInner>,
    /// Dispatcher/monitor handles; cancelled first at shutdown.
    background: Mutex<Vec<TaskHandle>>,
    /// Recurring job handles (cron scheduler); released last at shutdown.
    recurring: Mutex<Vec<TaskHandle>>,
}

impl Engine {
    /// Create the engine and spawn its dispatcher and monitor tasks.
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ResultStore>,
        source: Arc<dyn SampleSource>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            state: RwLock::new(EngineState {
                running: HashMap::new(),
                queue: PendingQueue::new(config.queue_capacity),
                stats: EngineStats::default(),
            }),
            max_concurrent: AtomicUsize::new(config.max_concurrent_tests.max(1)),
            shutting_down: AtomicBool::new(false),
            store,
            source,
            broadcaster,
            config: config.clone(),
        });

        let mut background = Vec::new();

        let dispatcher = tokio::spawn(run_dispatcher(
            Arc::clone(&inner),
            Duration::from_secs(config.dispatch_interval_sec.max(1)),
        ));
        background.push(TaskHandle::new(dispatcher));

        // monitor_interval_sec = 0 disables the monitor.
        if config.monitor_interval_sec > 0 {
            let mon = tokio::spawn(monitor::run_monitor(
                Arc::clone(&inner),
                Duration::from_secs(config.monitor_interval_sec),
            ));
            background.push(TaskHandle::new(mon));
        }

        Self {
            inner,
            background: Mutex::new(background),
            recurring: Mutex::new(Vec::new()),
        }
    }

    /// Admit a test. Below the cap it starts immediately; at the cap it is
    /// queued FIFO. Duplicate IDs and a full queue are rejected
    /// synchronously without mutating any state.
    pub async fn start(&self, config: TestConfig) -> Result<Admission, AdmissionError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(AdmissionError::ShuttingDown);
        }
        let test_id = config.test_id.clone();

        let mut state = self.inner.state.write().await;
        if state.running.contains_key(&test_id) || state.queue.contains(&test_id) {
            warn!(test_id = %test_id, "rejecting duplicate start");
            return Err(AdmissionError::Duplicate { test_id });
        }

        let cap = self.inner.max_concurrent.load(Ordering::Relaxed);
        if state.running.len() < cap {
            launch(&self.inner, &mut state, config).await;
            Ok(Admission::Started)
        } else {
            match state.queue.push(config) {
                Some(position) => {
                    debug!(test_id = %test_id, position, "concurrency cap reached; test queued");
                    Ok(Admission::Queued { position })
                }
                None => Err(AdmissionError::QueueFull {
                    capacity: self.inner.config.queue_capacity,
                }),
            }
        }
    }

    /// Stop a test by ID. Returns `false` when the ID is neither resident
    /// nor queued -- that is not an error and mutates nothing. A queued
    /// test is withdrawn without accruing runtime.
    pub async fn stop(&self, test_id: &str) -> bool {
        let outcome = {
            let mut state = self.inner.state.write().await;
            if let Some(config) = state.queue.remove(test_id) {
                Some((config.kind, None))
            } else if let Some(entry) = state.running.remove(test_id) {
                if let Some(handle) = &entry.handle {
                    handle.cancel();
                }
                let elapsed = entry.started_instant.elapsed();
                state.stats.total_runtime += elapsed;
                Some((entry.config.kind, Some(elapsed)))
            } else {
                None
            }
        };

        let Some((kind, elapsed)) = outcome else {
            return false;
        };

        if let Err(e) = self.inner.store.update_status(test_id, TestStatus::Stopped).await {
            warn!(test_id, error = %e, "failed to persist stopped status");
        }
        self.inner.broadcaster.publish(Event::new(
            format!("{kind}_stopped"),
            test_id,
            serde_json::json!({ "runtime_sec": elapsed.map(|d| d.as_secs_f64()) }),
        ));
        info!(test_id, kind = %kind, "test stopped");
        true
    }

    /// Stop every resident test and drain the queue. Returns the number of
    /// resident tests stopped; tolerates an empty table. A failure
    /// persisting one test's status never prevents stopping the rest.
    pub async fn stop_all(&self) -> usize {
        let (stopped, withdrawn) = {
            let mut state = self.inner.state.write().await;
            let withdrawn = state.queue.drain();
            let stopped: Vec<RunningTest> = state.running.drain().map(|(_, v)| v).collect();
            for entry in &stopped {
                if let Some(handle) = &entry.handle {
                    handle.cancel();
                }
                state.stats.total_runtime += entry.started_instant.elapsed();
            }
            (stopped, withdrawn)
        };

        for config in &withdrawn {
            if let Err(e) = self
                .inner
                .store
                .update_status(&config.test_id, TestStatus::Stopped)
                .await
            {
                warn!(
                    test_id = %config.test_id,
                    error = %e,
                    "failed to persist stopped status for queued test"
                );
            }
        }

        for entry in &stopped {
            let test_id = &entry.config.test_id;
            if let Err(e) = self.inner.store.update_status(test_id, TestStatus::Stopped).await {
                warn!(test_id = %test_id, error = %e, "failed to persist stopped status");
            }
            self.inner.broadcaster.publish(Event::new(
                format!("{}_stopped", entry.config.kind),
                test_id,
                serde_json::Value::Null,
            ));
        }

        if !stopped.is_empty() || !withdrawn.is_empty() {
            info!(
                stopped = stopped.len(),
                withdrawn = withdrawn.len(),
                "stopped all tests"
            );
        }
        stopped.len()
    }

    /// Number of tests currently resident in the running-table.
    pub async fn active_count(&self) -> usize {
        self.inner.state.read().await.running.len()
    }

    /// Number of tests waiting in the admission queue.
    pub async fn queue_depth(&self) -> usize {
        self.inner.state.read().await.queue.len()
    }

    /// Whether a test is currently resident.
    pub async fn is_running(&self, test_id: &str) -> bool {
        self.inner.state.read().await.running.contains_key(test_id)
    }

    /// Read-only statistics snapshot.
    pub async fn stats(&self) -> StatsSnapshot {
        let state = self.inner.state.read().await;
        state.stats.snapshot(
            state.running.len(),
            state.queue.len(),
            self.inner.max_concurrent.load(Ordering::Relaxed),
        )
    }

    /// Change the concurrency cap. Affects future dispatch decisions only;
    /// running tests are never preempted.
    pub fn set_max_concurrent(&self, cap: usize) {
        self.inner.max_concurrent.store(cap.max(1), Ordering::Relaxed);
        info!(cap, "concurrency cap updated");
    }

    /// Track a recurring background job (e.g. the cron scheduler loop) so
    /// shutdown can release it after the tests are stopped.
    pub async fn register_recurring(&self, handle: TaskHandle) {
        self.recurring.lock().await.push(handle);
    }

    /// Ordered, idempotent shutdown: dispatcher and monitor first (no new
    /// promotions), then every running test, then recurring jobs.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("engine shutting down");

        for handle in self.background.lock().await.drain(..) {
            handle.cancel();
        }
        let stopped = self.stop_all().await;
        for handle in self.recurring.lock().await.drain(..) {
            handle.cancel();
        }

        info!(stopped, "engine shutdown complete");
    }
}

/// Register a test in the running-table and spawn its sampling loop.
///
/// The state write guard must be held by the caller so the cancellation
/// handle is installed before the loop can observe the table.
async fn launch(inner: &Arc<EngineInner>, state: &mut EngineState, mut config: TestConfig) {
    config.status = TestStatus::Running;
    let test_id = config.test_id.clone();
    let now = Utc::now();

    state.running.insert(
        test_id.clone(),
        RunningTest {
            config: config.clone(),
            started_at: now,
            started_instant: Instant::now(),
            last_update: now,
            handle: None,
        },
    );
    state.stats.tests_started += 1;

    if let Err(e) = inner.store.update_status(&test_id, TestStatus::Running).await {
        // Setup failure before the first tick: the only path to `failed`.
        error!(test_id = %test_id, error = %e, "failed to mark test running; aborting setup");
        state.running.remove(&test_id);
        state.stats.tests_failed += 1;
        if let Err(e2) = inner.store.update_status(&test_id, TestStatus::Failed).await {
            warn!(test_id = %test_id, error = %e2, "failed to persist failed status");
        }
        return;
    }

    info!(test_id = %test_id, kind = %config.kind, "test started");

    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        runner::run_sampling_loop(task_inner, config).await;
    });

    if let Some(entry) = state.running.get_mut(&test_id) {
        entry.handle = Some(TaskHandle::new(handle));
    }
}

/// Promote queued tests whenever capacity frees up. Runs until cancelled
/// by shutdown.
async fn run_dispatcher(inner: Arc<EngineInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        loop {
            let cap = inner.max_concurrent.load(Ordering::Relaxed);
            let mut state = inner.state.write().await;
            if state.running.len() >= cap {
                break;
            }
            let Some(config) = state.queue.pop() else { break };
            info!(test_id = %config.test_id, "promoting queued test");
            launch(&inner, &mut state, config).await;
        }
    }
}
