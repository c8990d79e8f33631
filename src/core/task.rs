//! Task entity, identifiers, and lifecycle state machine.

use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::util::cancel::CancelScope;
use crate::util::clock::now_ms;

/// Unique identifier of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to the sandboxed module a task instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(Uuid);

impl ModuleId {
    /// Generate a fresh random module reference.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ModuleId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a task.
///
/// `Ready` is initial and `Terminated` is terminal. `Running` is held for the
/// duration of one dispatch. `Suspended` is reserved for preemption and no
/// built-in algorithm enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Eligible for dispatch.
    Ready,
    /// Holding the current time-slice grant.
    Running,
    /// Parked; unused by the built-in algorithms.
    Suspended,
    /// Removed from scheduling for good.
    Terminated,
}

impl TaskState {
    /// Whether this is the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Mutable portion of a task, guarded by the task's own lock.
#[derive(Debug)]
struct TaskRuntime {
    state: TaskState,
    priority: i32,
    started_at_ms: Option<u128>,
    cpu_time: Duration,
    memory_usage: u64,
}

/// One schedulable unit of sandboxed work.
///
/// Tasks are shared as `Arc<Task>` between the task manager and exactly one
/// scheduling algorithm. Every state transition happens under the task's own
/// lock, and `Terminated` can never be left once entered.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    module_id: ModuleId,
    created_at_ms: u128,
    cancel: CancelScope,
    yield_signal: Notify,
    runtime: RwLock<TaskRuntime>,
}

impl Task {
    /// Create a `Ready` task bound to `module_id`.
    #[must_use]
    pub fn new(module_id: ModuleId, priority: i32) -> Self {
        Self::with_id(TaskId::new(), module_id, priority)
    }

    /// Create a `Ready` task with a caller-chosen identifier.
    #[must_use]
    pub fn with_id(id: TaskId, module_id: ModuleId, priority: i32) -> Self {
        Self {
            id,
            module_id,
            created_at_ms: now_ms(),
            cancel: CancelScope::new(),
            yield_signal: Notify::new(),
            runtime: RwLock::new(TaskRuntime {
                state: TaskState::Ready,
                priority,
                started_at_ms: None,
                cpu_time: Duration::ZERO,
                memory_usage: 0,
            }),
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Module this task instantiates.
    #[must_use]
    pub const fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Creation time in milliseconds since epoch.
    #[must_use]
    pub const fn created_at_ms(&self) -> u128 {
        self.created_at_ms
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.runtime.read().state
    }

    /// Move to `state`. Returns `false` and leaves the task untouched if it is
    /// already `Terminated`; use [`Task::terminate`] to enter the terminal state.
    pub fn set_state(&self, state: TaskState) -> bool {
        if state.is_terminal() {
            return self.terminate();
        }
        let mut rt = self.runtime.write();
        if rt.state.is_terminal() {
            return false;
        }
        rt.state = state;
        true
    }

    /// Enter `Terminated` and release the cancellation scope.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn terminate(&self) -> bool {
        let mut rt = self.runtime.write();
        if rt.state.is_terminal() {
            return false;
        }
        rt.state = TaskState::Terminated;
        self.cancel.cancel();
        true
    }

    /// Caller-supplied priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.runtime.read().priority
    }

    pub(crate) fn set_priority(&self, priority: i32) {
        self.runtime.write().priority = priority;
    }

    /// Accumulated CPU time granted so far.
    #[must_use]
    pub fn cpu_time(&self) -> Duration {
        self.runtime.read().cpu_time
    }

    /// Add `elapsed` to the accumulated CPU time.
    pub fn add_cpu_time(&self, elapsed: Duration) {
        let mut rt = self.runtime.write();
        rt.cpu_time = rt.cpu_time.saturating_add(elapsed);
    }

    /// Last memory figure reported by the execution backend, in bytes.
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        self.runtime.read().memory_usage
    }

    /// Store a memory figure reported by the execution backend.
    pub fn update_memory(&self, bytes: u64) {
        self.runtime.write().memory_usage = bytes;
    }

    /// Time of the first dispatch, if any.
    #[must_use]
    pub fn started_at_ms(&self) -> Option<u128> {
        self.runtime.read().started_at_ms
    }

    /// The task-lifetime cancellation scope.
    #[must_use]
    pub const fn cancel_scope(&self) -> &CancelScope {
        &self.cancel
    }

    /// Ready -> Running, stamping `started_at` on the first dispatch.
    /// Returns `false` if the task is not `Ready`.
    pub(crate) fn begin_dispatch(&self) -> bool {
        let mut rt = self.runtime.write();
        if rt.state != TaskState::Ready {
            return false;
        }
        rt.state = TaskState::Running;
        if rt.started_at_ms.is_none() {
            rt.started_at_ms = Some(now_ms());
        }
        true
    }

    /// Running -> Ready. No-op once terminated.
    pub(crate) fn end_dispatch(&self) {
        let mut rt = self.runtime.write();
        if rt.state == TaskState::Running {
            rt.state = TaskState::Ready;
        }
    }

    /// Ask an in-flight dispatch to end early as a yield.
    pub(crate) fn request_yield(&self) {
        self.yield_signal.notify_waiters();
    }

    /// Listener for [`Task::request_yield`]. It must be enabled before the
    /// task is marked `Running`, otherwise an early request is lost.
    pub(crate) fn yield_listener(&self) -> Notified<'_> {
        self.yield_signal.notified()
    }

    /// Independent copy of the task's current fields.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let rt = self.runtime.read();
        TaskSnapshot {
            id: self.id,
            module_id: self.module_id,
            priority: rt.priority,
            state: rt.state,
            created_at_ms: self.created_at_ms,
            started_at_ms: rt.started_at_ms,
            cpu_time: rt.cpu_time,
            memory_usage: rt.memory_usage,
        }
    }
}

/// Point-in-time copy of a task, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: TaskId,
    /// Module reference.
    pub module_id: ModuleId,
    /// Priority.
    pub priority: i32,
    /// State at snapshot time.
    pub state: TaskState,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// First dispatch time (ms since epoch).
    pub started_at_ms: Option<u128>,
    /// Accumulated CPU time.
    pub cpu_time: Duration,
    /// Last reported memory usage in bytes.
    pub memory_usage: u64,
}

/// Per-task dispatch counters, kept only when metrics are enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Task identifier.
    pub task_id: TaskId,
    /// Mirror of the task's accumulated CPU time.
    pub cpu_time: Duration,
    /// Mirror of the task's last memory figure.
    pub memory_usage: u64,
    /// Number of completed dispatch cycles.
    pub switches: u64,
    /// Time of the last dispatch cycle (ms since epoch).
    pub last_switch_ms: u128,
}

impl TaskMetrics {
    /// Fresh counters for a newly scheduled task.
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            cpu_time: Duration::ZERO,
            memory_usage: 0,
            switches: 0,
            last_switch_ms: now_ms(),
        }
    }
}
