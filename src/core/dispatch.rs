//! Dispatch machinery shared by every scheduling algorithm.
//!
//! - [`Dispatcher`] runs one dispatch cycle against the execution backend
//! - [`MetricsStore`] keeps per-task counters behind their own lock
//! - [`Lifecycle`] owns the background loop's start/stop sequencing

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::AlgorithmKind;
use crate::core::audit::{build_audit_event, SharedAuditSink};
use crate::core::backend::{DispatchRequest, ExecutionBackend, ExecutionOutcome};
use crate::core::task::{Task, TaskId, TaskMetrics};
use crate::core::SchedulerError;
use crate::util::cancel::CancelScope;
use crate::util::clock::now_ms;

/// Capacity of the best-effort wake-up channel feeding a dispatch loop.
pub(crate) const SIGNAL_CAPACITY: usize = 100;

/// How one dispatch cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Backend reported terminal completion.
    Completed,
    /// Backend returned early, or a yield was requested.
    Yielded,
    /// The granted slice ran out first.
    SliceExpired,
    /// The task was terminated while running.
    Cancelled,
}

/// Why a task left its algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Explicit `unschedule` call.
    Unscheduled,
    /// Backend reported completion.
    Completed,
    /// Accumulated CPU time exceeded `max_cpu_time`.
    CpuLimitExceeded,
    /// Cooperative task never yielded within its remaining budget.
    Overrun,
    /// The algorithm was stopped.
    Shutdown,
}

impl TerminationReason {
    /// Audit action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unscheduled => "unschedule",
            Self::Completed => "completed",
            Self::CpuLimitExceeded => "cpu_limit_exceeded",
            Self::Overrun => "overrun",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchResult {
    pub outcome: DispatchOutcome,
    pub cpu_limit_exceeded: bool,
}

impl DispatchResult {
    /// Termination the owning algorithm must carry out, if any.
    pub const fn termination(&self) -> Option<TerminationReason> {
        match self.outcome {
            DispatchOutcome::Cancelled => None,
            DispatchOutcome::Completed => Some(TerminationReason::Completed),
            _ if self.cpu_limit_exceeded => Some(TerminationReason::CpuLimitExceeded),
            _ => None,
        }
    }
}

/// Per-task metrics behind a lock separate from any task structure.
#[derive(Debug)]
pub(crate) struct MetricsStore {
    enabled: bool,
    entries: RwLock<HashMap<TaskId, TaskMetrics>>,
}

impl MetricsStore {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, task_id: TaskId) {
        if self.enabled {
            self.entries.write().insert(task_id, TaskMetrics::new(task_id));
        }
    }

    pub fn remove(&self, task_id: TaskId) {
        self.entries.write().remove(&task_id);
    }

    pub fn record_switch(&self, task: &Task) {
        if !self.enabled {
            return;
        }
        if let Some(metrics) = self.entries.write().get_mut(&task.id()) {
            metrics.cpu_time = task.cpu_time();
            metrics.memory_usage = task.memory_usage();
            metrics.switches += 1;
            metrics.last_switch_ms = now_ms();
        }
    }

    /// Independent copies; callers cannot touch live counters.
    pub fn snapshot(&self) -> HashMap<TaskId, TaskMetrics> {
        self.entries.read().clone()
    }
}

/// Runs single dispatch cycles and records their side effects.
pub(crate) struct Dispatcher {
    algorithm: AlgorithmKind,
    backend: Arc<dyn ExecutionBackend>,
    max_cpu_time: Duration,
    pub metrics: MetricsStore,
    audit: RwLock<Option<SharedAuditSink>>,
}

impl Dispatcher {
    pub fn new(
        algorithm: AlgorithmKind,
        backend: Arc<dyn ExecutionBackend>,
        max_cpu_time: Duration,
        metrics_enabled: bool,
    ) -> Self {
        Self {
            algorithm,
            backend,
            max_cpu_time,
            metrics: MetricsStore::new(metrics_enabled),
            audit: RwLock::new(None),
        }
    }

    pub const fn max_cpu_time(&self) -> Duration {
        self.max_cpu_time
    }

    pub fn set_audit(&self, sink: SharedAuditSink) {
        *self.audit.write() = Some(sink);
    }

    /// Audit detail for a termination: the CPU figures that led to it.
    pub fn termination_detail(&self, task: &Task, reason: TerminationReason) -> Option<String> {
        let cpu_time_ms = task.cpu_time().as_millis();
        match reason {
            TerminationReason::CpuLimitExceeded | TerminationReason::Overrun => Some(format!(
                "cpu_time_ms={cpu_time_ms} max_cpu_time_ms={}",
                self.max_cpu_time.as_millis()
            )),
            TerminationReason::Completed => Some(format!("cpu_time_ms={cpu_time_ms}")),
            TerminationReason::Unscheduled | TerminationReason::Shutdown => None,
        }
    }

    pub fn audit(&self, task_id: TaskId, action: &str, detail: Option<String>) {
        let sink = self.audit.read().clone();
        if let Some(sink) = sink {
            sink.record(build_audit_event(
                format!("{task_id}-{action}-{}", now_ms()),
                task_id.to_string(),
                self.algorithm.as_str(),
                action,
                detail,
            ));
        }
    }

    /// Run `task` for at most `slice`.
    ///
    /// Returns `None` without touching the task if it is not `Ready`.
    pub async fn dispatch(&self, task: &Arc<Task>, slice: Duration) -> Option<DispatchResult> {
        let yield_listener = task.yield_listener();
        tokio::pin!(yield_listener);
        yield_listener.as_mut().enable();
        if !task.begin_dispatch() {
            return None;
        }

        let slice_scope = task.cancel_scope().child();
        let request = DispatchRequest {
            task_id: task.id(),
            module_id: task.module_id(),
            priority: task.priority(),
            slice,
            cancel: slice_scope.clone(),
        };

        let start = Instant::now();
        let outcome = tokio::select! {
            report = self.backend.run(request) => {
                if let Some(bytes) = report.memory_usage {
                    task.update_memory(bytes);
                }
                match report.outcome {
                    ExecutionOutcome::Completed => DispatchOutcome::Completed,
                    ExecutionOutcome::Yielded => DispatchOutcome::Yielded,
                }
            }
            () = tokio::time::sleep(slice) => DispatchOutcome::SliceExpired,
            () = &mut yield_listener => DispatchOutcome::Yielded,
            () = task.cancel_scope().cancelled() => DispatchOutcome::Cancelled,
        };
        slice_scope.cancel();

        let elapsed = start.elapsed();
        task.add_cpu_time(elapsed);
        // A completed task goes straight from Running to Terminated
        if outcome != DispatchOutcome::Completed {
            task.end_dispatch();
        }
        self.metrics.record_switch(task);

        let cpu_limit_exceeded = task.cpu_time() > self.max_cpu_time;
        debug!(
            algorithm = %self.algorithm,
            task_id = %task.id(),
            ?outcome,
            elapsed_ms = elapsed.as_millis(),
            cpu_limit_exceeded,
            "dispatch cycle finished"
        );

        Some(DispatchResult {
            outcome,
            cpu_limit_exceeded,
        })
    }
}

#[derive(Default)]
struct LoopSlot {
    shutdown: Option<CancelScope>,
    handle: Option<JoinHandle<()>>,
}

/// Start/stop sequencing for one background loop.
///
/// The slot lock is held across the join in `stop`, so a concurrent `start`
/// waits until the previous loop has fully exited.
pub(crate) struct Lifecycle {
    running: AtomicBool,
    slot: tokio::sync::Mutex<LoopSlot>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            slot: tokio::sync::Mutex::new(LoopSlot::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the loop built by `spawn_loop` on the current Tokio runtime.
    pub async fn start<F, Fut>(&self, spawn_loop: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(CancelScope) -> Fut + Send,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().await;
        if slot.handle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Runtime(e.to_string()))?;

        let shutdown = CancelScope::new();
        slot.handle = Some(runtime.spawn(spawn_loop(shutdown.clone())));
        slot.shutdown = Some(shutdown);
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Signal shutdown, run `before_join`, then wait for the loop to exit.
    pub async fn stop<F>(&self, before_join: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send,
    {
        let mut slot = self.slot.lock().await;
        let Some(handle) = slot.handle.take() else {
            return Err(SchedulerError::NotRunning);
        };
        self.running.store(false, Ordering::Release);
        if let Some(shutdown) = slot.shutdown.take() {
            shutdown.cancel();
        }
        before_join();
        if let Err(e) = handle.await {
            error!("background loop ended abnormally: {}", e);
        }
        Ok(())
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.slot.get_mut().shutdown.take() {
            shutdown.cancel();
        }
    }
}
