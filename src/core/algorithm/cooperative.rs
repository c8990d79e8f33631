//! Cooperative scheduling.
//!
//! Tasks run until they yield, complete, or exhaust their CPU budget. The loop
//! is event-driven: it dispatches whatever is in the ready queue and parks on
//! a `Notify` when the queue is empty. The only preemption is the watchdog,
//! which is the task's remaining CPU budget (`max_cpu_time - cpu_time`); a
//! task that runs through it without yielding is terminated as an overrun.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::{AlgorithmKind, SchedulerConfig};
use crate::core::audit::SharedAuditSink;
use crate::core::backend::ExecutionBackend;
use crate::core::dispatch::{DispatchOutcome, Dispatcher, Lifecycle, TerminationReason};
use crate::core::task::{Task, TaskId, TaskMetrics, TaskSnapshot, TaskState};
use crate::core::SchedulerError;
use crate::util::cancel::CancelScope;

use super::SchedulingAlgorithm;

struct CooperativeState {
    tasks: Vec<Arc<Task>>,
    ready: VecDeque<Arc<Task>>,
}

struct CooperativeCore {
    config: SchedulerConfig,
    state: Mutex<CooperativeState>,
    dispatcher: Dispatcher,
    wake: Notify,
}

/// Event-driven scheduler where tasks give up the CPU voluntarily.
///
/// Fairness depends on tasks yielding; a task can hold the loop for its
/// entire remaining CPU budget.
pub struct CooperativeScheduler {
    core: Arc<CooperativeCore>,
    lifecycle: Lifecycle,
}

impl CooperativeScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        let capacity = config.resource_limits.max_tasks.min(1024);
        let dispatcher = Dispatcher::new(
            AlgorithmKind::Cooperative,
            backend,
            config.resource_limits.max_cpu_time(),
            config.metrics_enabled,
        );
        Self {
            core: Arc::new(CooperativeCore {
                state: Mutex::new(CooperativeState {
                    tasks: Vec::with_capacity(capacity),
                    ready: VecDeque::with_capacity(capacity),
                }),
                config,
                dispatcher,
                wake: Notify::new(),
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

    /// Ask the currently running `task_id` to give up the CPU.
    ///
    /// The in-flight dispatch ends as a yield and the task is re-queued.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` for unknown ids, `TaskNotRunning` if the task is not
    /// mid-dispatch.
    pub fn yield_task(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let state = self.core.state.lock();
        let Some(task) = state.tasks.iter().find(|t| t.id() == task_id) else {
            return Err(SchedulerError::TaskNotFound(task_id));
        };
        if task.state() != TaskState::Running {
            return Err(SchedulerError::TaskNotRunning(task_id));
        }
        task.request_yield();
        debug!(task_id = %task_id, "yield requested");
        Ok(())
    }
}

impl CooperativeCore {
    fn max_tasks(&self) -> usize {
        self.config.resource_limits.max_tasks
    }

    fn schedule(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        let task_id = task.id();
        {
            let mut state = self.state.lock();
            if state.tasks.len() >= self.max_tasks() {
                warn!(task_id = %task_id, "cooperative scheduler full, rejecting task");
                return Err(SchedulerError::MaxTasksReached);
            }
            if state.tasks.iter().any(|t| t.id() == task_id) {
                return Err(SchedulerError::TaskAlreadyExists(task_id));
            }
            if !task.set_state(TaskState::Ready) {
                return Err(SchedulerError::TaskNotFound(task_id));
            }
            if state.ready.len() < self.max_tasks() {
                state.ready.push_back(Arc::clone(&task));
            } else {
                debug!(task_id = %task_id, "ready queue full, task not queued");
            }
            state.tasks.push(task);
            self.dispatcher.metrics.register(task_id);
        }
        self.wake.notify_one();
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
            state.ready.retain(|t| t.id() != task_id);
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
            state.ready.clear();
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
        while let Some(task) = state.ready.pop_front() {
            if task.state() != TaskState::Terminated {
                return Some(task);
            }
        }
        None
    }

    /// Put a task that yielded back at the tail of the ready queue.
    fn requeue(&self, task: &Arc<Task>) {
        {
            let mut state = self.state.lock();
            let held = state.tasks.iter().any(|t| t.id() == task.id());
            if !held || task.state() == TaskState::Terminated {
                return;
            }
            if state.ready.len() >= self.max_tasks() {
                debug!(task_id = %task.id(), "ready queue full, yielded task dropped from queue");
                return;
            }
            state.ready.push_back(Arc::clone(task));
        }
        self.wake.notify_one();
    }

    async fn run_once(&self, task: &Arc<Task>) {
        let budget = self
            .dispatcher
            .max_cpu_time()
            .saturating_sub(task.cpu_time());
        if budget.is_zero() {
            warn!(task_id = %task.id(), "task has no CPU budget left");
            let _ = self.remove(task.id(), TerminationReason::CpuLimitExceeded);
            return;
        }

        let Some(result) = self.dispatcher.dispatch(task, budget).await else {
            return;
        };
        let termination = if result.outcome == DispatchOutcome::SliceExpired {
            Some(TerminationReason::Overrun)
        } else {
            result.termination()
        };
        match termination {
            Some(reason) => {
                if reason == TerminationReason::Overrun {
                    warn!(task_id = %task.id(), cpu_time_ms = task.cpu_time().as_millis(), "task ran through its budget without yielding");
                }
                let _ = self.remove(task.id(), reason);
            }
            None => self.requeue(task),
        }
    }

    async fn run_loop(self: Arc<Self>, shutdown: CancelScope) {
        info!("cooperative dispatch loop started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if let Some(task) = self.next_ready() {
                self.run_once(&task).await;
                continue;
            }
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.wake.notified() => {}
            }
        }
        info!("cooperative dispatch loop stopped");
    }
}

#[async_trait]
impl SchedulingAlgorithm for CooperativeScheduler {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Cooperative
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
