//! Round-robin scheduling: a FIFO cursor over the task list, one dispatch per
//! tick, priority ignored.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{AlgorithmKind, SchedulerConfig};
use crate::core::audit::SharedAuditSink;
use crate::core::backend::ExecutionBackend;
use crate::core::dispatch::{Dispatcher, Lifecycle, TerminationReason, SIGNAL_CAPACITY};
use crate::core::task::{Task, TaskId, TaskMetrics, TaskSnapshot, TaskState};
use crate::core::SchedulerError;
use crate::util::cancel::CancelScope;

use super::SchedulingAlgorithm;

struct RoundRobinState {
    tasks: Vec<Arc<Task>>,
    cursor: usize,
}

struct RoundRobinCore {
    config: SchedulerConfig,
    state: Mutex<RoundRobinState>,
    dispatcher: Dispatcher,
    signal_tx: mpsc::Sender<TaskId>,
    signal_rx: Mutex<Option<mpsc::Receiver<TaskId>>>,
}

/// Fair, priority-blind scheduler.
///
/// Every tick of the configured time slice advances a cursor modulo the task
/// count and dispatches the task under it. Freshly scheduled tasks also wake
/// the loop through a bounded signal channel; a full channel drops the
/// signal and the task is picked up by a later tick instead.
pub struct RoundRobinScheduler {
    core: Arc<RoundRobinCore>,
    lifecycle: Lifecycle,
}

impl RoundRobinScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let dispatcher = Dispatcher::new(
            AlgorithmKind::RoundRobin,
            backend,
            config.resource_limits.max_cpu_time(),
            config.metrics_enabled,
        );
        Self {
            core: Arc::new(RoundRobinCore {
                state: Mutex::new(RoundRobinState {
                    tasks: Vec::with_capacity(config.resource_limits.max_tasks.min(1024)),
                    cursor: 0,
                }),
                config,
                dispatcher,
                signal_tx,
                signal_rx: Mutex::new(Some(signal_rx)),
            }),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Attach an audit sink for lifecycle events.
    #[must_use]
    pub fn with_audit(self, sink: SharedAuditSink) -> Self {
        self.core.dispatcher.set_audit(sink);
        self
    }
}

impl RoundRobinCore {
    fn schedule(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        let task_id = task.id();
        {
            let mut state = self.state.lock();
            if state.tasks.len() >= self.config.resource_limits.max_tasks {
                warn!(task_id = %task_id, "round-robin queue full, rejecting task");
                return Err(SchedulerError::MaxTasksReached);
            }
            if state.tasks.iter().any(|t| t.id() == task_id) {
                return Err(SchedulerError::TaskAlreadyExists(task_id));
            }
            if !task.set_state(TaskState::Ready) {
                return Err(SchedulerError::TaskNotFound(task_id));
            }
            state.tasks.push(task);
            self.dispatcher.metrics.register(task_id);
            if self.signal_tx.try_send(task_id).is_err() {
                debug!(task_id = %task_id, "wake signal dropped, task waits for next tick");
            }
        }
        self.dispatcher.audit(task_id, "schedule", None);
        debug!(task_id = %task_id, "task scheduled");
        Ok(())
    }

    fn remove(&self, task_id: TaskId, reason: TerminationReason) -> Result<(), SchedulerError> {
        let detail = {
            let mut state = self.state.lock();
            let Some(index) = state.tasks.iter().position(|t| t.id() == task_id) else {
                return Err(SchedulerError::TaskNotFound(task_id));
            };
            let task = state.tasks.remove(index);
            task.terminate();
            if index < state.cursor {
                state.cursor -= 1;
            }
            if state.cursor >= state.tasks.len() {
                state.cursor = 0;
            }
            self.dispatcher.metrics.remove(task_id);
            self.dispatcher.termination_detail(&task, reason)
        };
        self.dispatcher.audit(task_id, reason.as_str(), detail);
        info!(task_id = %task_id, reason = reason.as_str(), "task terminated");
        Ok(())
    }

    fn terminate_all(&self) {
        let drained: Vec<Arc<Task>> = {
            let mut state = self.state.lock();
            state.cursor = 0;
            let drained: Vec<_> = state.tasks.drain(..).collect();
            for task in &drained {
                task.terminate();
                self.dispatcher.metrics.remove(task.id());
            }
            drained
        };
        for task in drained {
            self.dispatcher
                .audit(task.id(), TerminationReason::Shutdown.as_str(), None);
        }
    }

    fn next_ready(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock();
        let len = state.tasks.len();
        for _ in 0..len {
            let task = Arc::clone(&state.tasks[state.cursor]);
            state.cursor = (state.cursor + 1) % len;
            if task.state() != TaskState::Terminated {
                return Some(task);
            }
        }
        None
    }

    fn find(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.state
            .lock()
            .tasks
            .iter()
            .find(|t| t.id() == task_id)
            .cloned()
    }

    async fn run_once(&self, task: &Arc<Task>) {
        let Some(result) = self.dispatcher.dispatch(task, self.config.time_slice()).await else {
            return;
        };
        if let Some(reason) = result.termination() {
            if reason == TerminationReason::CpuLimitExceeded {
                warn!(task_id = %task.id(), cpu_time_ms = task.cpu_time().as_millis(), "task exceeded CPU budget");
            }
            let _ = self.remove(task.id(), reason);
        }
    }

    async fn run_loop(self: Arc<Self>, shutdown: CancelScope) {
        let Some(mut signals) = self.signal_rx.lock().take() else {
            error!("round-robin signal channel already taken, dispatch loop not started");
            return;
        };

        let mut ticker = tokio::time::interval(self.config.time_slice());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!(time_slice_ms = self.config.time_slice_ms, "round-robin dispatch loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(task) = self.next_ready() {
                        self.run_once(&task).await;
                    }
                }
                Some(task_id) = signals.recv() => {
                    if let Some(task) = self.find(task_id) {
                        self.run_once(&task).await;
                    }
                }
            }
        }

        *self.signal_rx.lock() = Some(signals);
        info!("round-robin dispatch loop stopped");
    }
}

#[async_trait]
impl SchedulingAlgorithm for RoundRobinScheduler {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::RoundRobin
    }

    fn schedule(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        self.core.schedule(task)
    }

    fn unschedule(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        self.core.remove(task_id, TerminationReason::Unscheduled)
    }

    fn next_ready(&self) -> Option<Arc<Task>> {
        self.core.next_ready()
    }

    fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.core.state.lock().tasks.iter().map(|t| t.snapshot()).collect()
    }

    fn metrics_snapshot(&self) -> HashMap<TaskId, TaskMetrics> {
        self.core.dispatcher.metrics.snapshot()
    }

    async fn start(&self) -> Result<(), SchedulerError> {
        let core = Arc::clone(&self.core);
        self.lifecycle
            .start(move |shutdown| core.run_loop(shutdown))
            .await
    }

    async fn stop(&self) -> Result<(), SchedulerError> {
        self.lifecycle.stop(|| self.core.terminate_all()).await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}
