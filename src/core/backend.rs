//! Execution backend abstraction.
//!
//! The scheduler never runs module code itself. Each dispatch hands a
//! [`DispatchRequest`] to an [`ExecutionBackend`] and races it against the
//! time slice. The backend reports `Completed` or `Yielded`; slice expiry has
//! no report because the scheduler's own timer fires first.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use prometheus_sandbox_scheduler::core::{
//!     DispatchRequest, ExecutionBackend, ExecutionOutcome, ExecutionReport,
//! };
//!
//! struct WasmtimeBackend { /* engine, store cache, ... */ }
//!
//! #[async_trait]
//! impl ExecutionBackend for WasmtimeBackend {
//!     async fn run(&self, request: DispatchRequest) -> ExecutionReport {
//!         // run fuel-bounded until request.slice elapses or request.cancel fires
//!         ExecutionReport::yielded().with_memory(64 * 1024)
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;

use crate::core::task::{ModuleId, TaskId};
use crate::util::cancel::CancelScope;

/// Everything a backend needs to run one time slice of a task.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Task being dispatched.
    pub task_id: TaskId,
    /// Module the task instantiates.
    pub module_id: ModuleId,
    /// Task priority at dispatch time.
    pub priority: i32,
    /// Granted duration for this dispatch.
    pub slice: Duration,
    /// Released when the slice ends or the task is terminated.
    pub cancel: CancelScope,
}

/// How a backend call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The module ran to completion; the task is terminated.
    Completed,
    /// Cooperative early return; the task stays schedulable.
    Yielded,
}

/// Result of one backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    /// How the call ended.
    pub outcome: ExecutionOutcome,
    /// Memory footprint observed by the backend, in bytes.
    pub memory_usage: Option<u64>,
}

impl ExecutionReport {
    /// Report a completed module.
    #[must_use]
    pub const fn completed() -> Self {
        Self {
            outcome: ExecutionOutcome::Completed,
            memory_usage: None,
        }
    }

    /// Report a cooperative yield.
    #[must_use]
    pub const fn yielded() -> Self {
        Self {
            outcome: ExecutionOutcome::Yielded,
            memory_usage: None,
        }
    }

    /// Attach an observed memory figure.
    #[must_use]
    pub const fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_usage = Some(bytes);
        self
    }
}

/// Runs a task's code for at most one bounded dispatch.
///
/// Implementations should return promptly once `request.cancel` fires, but the
/// scheduler does not depend on it: a call that never returns is abandoned
/// when the slice expires.
#[async_trait]
pub trait ExecutionBackend: Send + Sync + 'static {
    /// Execute `request` and report how it ended.
    async fn run(&self, request: DispatchRequest) -> ExecutionReport;
}

/// Stand-in backend that performs no real work.
///
/// With `work` set, each dispatch sleeps that long and then yields. Without
/// it, each dispatch occupies its whole slice, so the scheduler's timer
/// expires it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    work: Option<Duration>,
    memory_usage: Option<u64>,
}

impl SimulatedBackend {
    /// Backend that consumes the full slice on every dispatch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            work: None,
            memory_usage: None,
        }
    }

    /// Yield after `work` instead of consuming the full slice.
    #[must_use]
    pub const fn with_work(mut self, work: Duration) -> Self {
        self.work = Some(work);
        self
    }

    /// Report `bytes` of memory on every dispatch.
    #[must_use]
    pub const fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_usage = Some(bytes);
        self
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn run(&self, request: DispatchRequest) -> ExecutionReport {
        let work = self.work.unwrap_or(request.slice);
        tokio::select! {
            () = tokio::time::sleep(work) => {}
            () = request.cancel.cancelled() => {}
        }
        let report = ExecutionReport::yielded();
        match self.memory_usage {
            Some(bytes) => report.with_memory(bytes),
            None => report,
        }
    }
}
