//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::task::TaskId;

/// Errors produced by scheduler components.
///
/// Every variant is recoverable: algorithms and the task manager return these
/// to their caller and keep their background loops alive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The algorithm's own queue is at `max_tasks`.
    #[error("maximum number of tasks reached")]
    MaxTasksReached,
    /// Pool-level admission failed on memory or CPU.
    #[error("insufficient resources: {0}")]
    ResourceExhausted(String),
    /// No task with this id in the relevant structure.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// A task with this id is already scheduled.
    #[error("task already exists: {0}")]
    TaskAlreadyExists(TaskId),
    /// The operation needs the task to be running.
    #[error("task is not running: {0}")]
    TaskNotRunning(TaskId),
    /// `start` called on a running component.
    #[error("scheduler is already running")]
    AlreadyRunning,
    /// `stop` called on a component that is not running.
    #[error("scheduler is not running")]
    NotRunning,
    /// Configuration named an algorithm that does not exist.
    #[error("unknown scheduler algorithm: {0}")]
    UnknownAlgorithm(String),
    /// The active algorithm does not support this operation.
    #[error("{operation} is not supported by the {algorithm} algorithm")]
    Unsupported {
        /// Algorithm name.
        algorithm: &'static str,
        /// Rejected operation.
        operation: &'static str,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// No async runtime to host the background loops.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
