//! Scheduling algorithms.
//!
//! Three interchangeable disciplines share one [`SchedulingAlgorithm`]
//! capability and are selected by configuration through the tagged
//! [`Algorithm`] enum:
//!
//! - **Round-Robin**: fixed tick, FIFO cursor, priority ignored
//! - **Cooperative**: event-driven; a task runs until it yields
//! - **Priority**: max-heap on priority with priority-scaled time slices
//!
//! Each algorithm owns its ready structure behind one exclusive lock, keeps
//! per-task metrics behind a separate lock, and runs one background dispatch
//! loop between `start` and `stop`.

mod cooperative;
mod priority;
mod round_robin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AlgorithmKind, SchedulerConfig};
use crate::core::audit::SharedAuditSink;
use crate::core::backend::ExecutionBackend;
use crate::core::task::{Task, TaskId, TaskMetrics, TaskSnapshot};
use crate::core::SchedulerError;

pub use cooperative::CooperativeScheduler;
pub use priority::{priority_time_slice, PriorityScheduler};
pub use round_robin::RoundRobinScheduler;

/// Capability shared by every scheduling discipline.
///
/// All methods are safe to call concurrently with the dispatch loop.
#[async_trait]
pub trait SchedulingAlgorithm: Send + Sync {
    /// Which discipline this is.
    fn kind(&self) -> AlgorithmKind;

    /// Insert `task` into the ready structure as `Ready` and wake the loop.
    ///
    /// # Errors
    ///
    /// `MaxTasksReached` at capacity, `TaskAlreadyExists` for a duplicate id,
    /// `TaskNotFound` if the task is already terminated.
    fn schedule(&self, task: Arc<Task>) -> Result<(), SchedulerError>;

    /// Terminate the task, release its cancellation scope, and drop it from
    /// every structure.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the id is not held by this algorithm.
    fn unschedule(&self, task_id: TaskId) -> Result<(), SchedulerError>;

    /// Next task per the ordering policy, if any.
    fn next_ready(&self) -> Option<Arc<Task>>;

    /// Snapshots of every task held.
    fn list_tasks(&self) -> Vec<TaskSnapshot>;

    /// Independent copies of per-task metrics. Empty when metrics are off.
    fn metrics_snapshot(&self) -> HashMap<TaskId, TaskMetrics>;

    /// Spawn the dispatch loop on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started twice, `Runtime` outside a Tokio runtime.
    async fn start(&self) -> Result<(), SchedulerError>;

    /// Stop the dispatch loop and terminate every remaining task.
    ///
    /// # Errors
    ///
    /// `NotRunning` if not started.
    async fn stop(&self) -> Result<(), SchedulerError>;

    /// Whether the dispatch loop is running.
    fn is_running(&self) -> bool;
}

/// The configured scheduling discipline.
pub enum Algorithm {
    /// Round-robin variant.
    RoundRobin(RoundRobinScheduler),
    /// Cooperative variant.
    Cooperative(CooperativeScheduler),
    /// Priority variant.
    Priority(PriorityScheduler),
}

impl Algorithm {
    /// Build the variant selected by `config.algorithm`.
    #[must_use]
    pub fn new(config: SchedulerConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        match config.algorithm {
            AlgorithmKind::RoundRobin => Self::RoundRobin(RoundRobinScheduler::new(config, backend)),
            AlgorithmKind::Cooperative => {
                Self::Cooperative(CooperativeScheduler::new(config, backend))
            }
            AlgorithmKind::Priority => Self::Priority(PriorityScheduler::new(config, backend)),
        }
    }

    /// Attach an audit sink for lifecycle events.
    #[must_use]
    pub fn with_audit(self, sink: SharedAuditSink) -> Self {
        match self {
            Self::RoundRobin(s) => Self::RoundRobin(s.with_audit(sink)),
            Self::Cooperative(s) => Self::Cooperative(s.with_audit(sink)),
            Self::Priority(s) => Self::Priority(s.with_audit(sink)),
        }
    }

    /// Re-prioritize a live task. Priority algorithm only.
    ///
    /// # Errors
    ///
    /// `Unsupported` on other variants, `TaskNotFound` for unknown ids.
    pub fn set_priority(&self, task_id: TaskId, priority: i32) -> Result<(), SchedulerError> {
        match self {
            Self::Priority(s) => s.set_priority(task_id, priority),
            other => Err(SchedulerError::Unsupported {
                algorithm: other.kind().as_str(),
                operation: "set_priority",
            }),
        }
    }

    /// Ask a running task to yield. Cooperative algorithm only.
    ///
    /// # Errors
    ///
    /// `Unsupported` on other variants, `TaskNotFound` / `TaskNotRunning`
    /// from the cooperative scheduler.
    pub fn yield_task(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        match self {
            Self::Cooperative(s) => s.yield_task(task_id),
            other => Err(SchedulerError::Unsupported {
                algorithm: other.kind().as_str(),
                operation: "yield_task",
            }),
        }
    }

    fn as_dyn(&self) -> &dyn SchedulingAlgorithm {
        match self {
            Self::RoundRobin(s) => s,
            Self::Cooperative(s) => s,
            Self::Priority(s) => s,
        }
    }
}

#[async_trait]
impl SchedulingAlgorithm for Algorithm {
    fn kind(&self) -> AlgorithmKind {
        self.as_dyn().kind()
    }

    fn schedule(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        self.as_dyn().schedule(task)
    }

    fn unschedule(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        self.as_dyn().unschedule(task_id)
    }

    fn next_ready(&self) -> Option<Arc<Task>> {
        self.as_dyn().next_ready()
    }

    fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.as_dyn().list_tasks()
    }

    fn metrics_snapshot(&self) -> HashMap<TaskId, TaskMetrics> {
        self.as_dyn().metrics_snapshot()
    }

    async fn start(&self) -> Result<(), SchedulerError> {
        self.as_dyn().start().await
    }

    async fn stop(&self) -> Result<(), SchedulerError> {
        self.as_dyn().stop().await
    }

    fn is_running(&self) -> bool {
        self.as_dyn().is_running()
    }
}
