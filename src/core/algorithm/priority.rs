//! Priority scheduling on a binary max-heap.
//!
//! `next_ready` pops the highest-priority task and pushes it straight back, so
//! the ordering is preserved across dispatches rather than consumed. Time
//! slices are scaled by priority band (see [`priority_time_slice`]).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

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

/// Priorities above this band get a doubled slice.
const HIGH_PRIORITY_FLOOR: i32 = 5;
/// Priorities below this band get a halved slice.
const LOW_PRIORITY_CEILING: i32 = 3;

/// Time slice granted to a task of `priority`.
///
/// Priority above 5 receives double the nominal slice, below 3 receives half,
/// anything else the nominal slice.
#[must_use]
pub fn priority_time_slice(nominal: Duration, priority: i32) -> Duration {
    if priority > HIGH_PRIORITY_FLOOR {
        nominal.saturating_mul(2)
    } else if priority < LOW_PRIORITY_CEILING {
        nominal / 2
    } else {
        nominal
    }
}

/// Heap entry ordered by priority (highest first), FIFO within a priority.
struct HeapEntry {
    priority: i32,
    seq: u64,
    task: Arc<Task>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // Earlier sequence wins (reversed for max-heap)
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

struct PriorityState {
    heap: BinaryHeap<HeapEntry>,
    tasks: HashMap<TaskId, Arc<Task>>,
    next_seq: u64,
}

struct PriorityCore {
    config: SchedulerConfig,
    state: Mutex<PriorityState>,
    dispatcher: Dispatcher,
    signal_tx: mpsc::Sender<TaskId>,
    signal_rx: Mutex<Option<mpsc::Receiver<TaskId>>>,
}

/// Scheduler that always dispatches the highest-priority live task.
///
/// Lower-priority tasks only run when nothing above them is schedulable;
/// this favoritism is intentional.
pub struct PriorityScheduler {
    core: Arc<PriorityCore>,
    lifecycle: Lifecycle,
}

impl PriorityScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let dispatcher = Dispatcher::new(
            AlgorithmKind::Priority,
            backend,
            config.resource_limits.max_cpu_time(),
            config.metrics_enabled,
        );
        Self {
            core: Arc::new(PriorityCore {
                state: Mutex::new(PriorityState {
                    heap: BinaryHeap::with_capacity(config.resource_limits.max_tasks.min(1024)),
                    tasks: HashMap::new(),
                    next_seq: 0,
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

    /// Change a live task's priority and rebalance the heap.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the task is not held by this scheduler.
    pub fn set_priority(&self, task_id: TaskId, priority: i32) -> Result<(), SchedulerError> {
        let mut state = self.core.state.lock();
        let Some(task) = state.tasks.get(&task_id) else {
            return Err(SchedulerError::TaskNotFound(task_id));
        };
        task.set_priority(priority);

        let mut entries = std::mem::take(&mut state.heap).into_vec();
        for entry in entries.iter_mut().filter(|e| e.task.id() == task_id) {
            entry.priority = priority;
        }
        state.heap = BinaryHeap::from(entries);
        debug!(task_id = %task_id, priority, "task re-prioritized");
        Ok(())
    }
}

impl PriorityCore {
    fn schedule(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        let task_id = task.id();
        {
            let mut state = self.state.lock();
            if state.tasks.len() >= self.config.resource_limits.max_tasks {
                warn!(task_id = %task_id, "priority queue full, rejecting task");
                return Err(SchedulerError::MaxTasksReached);
            }
            if state.tasks.contains_key(&task_id) {
                return Err(SchedulerError::TaskAlreadyExists(task_id));
            }
            if !task.set_state(TaskState::Ready) {
                return Err(SchedulerError::TaskNotFound(task_id));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(HeapEntry {
                priority: task.priority(),
                seq,
                task: Arc::clone(&task),
            });
            state.tasks.insert(task_id, task);
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
            let Some(task) = state.tasks.remove(&task_id) else {
                return Err(SchedulerError::TaskNotFound(task_id));
            };
            task.terminate();
            state.heap.retain(|e| e.task.id() != task_id);
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
            state.heap.clear();
            let drained: Vec<_> = state.tasks.drain().map(|(_, t)| t).collect();
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
        while let Some(entry) = state.heap.pop() {
            if entry.task.state() == TaskState::Terminated {
                continue;
            }
            let task = Arc::clone(&entry.task);
            state.heap.push(entry);
            return Some(task);
        }
        None
    }

    async fn run_once(&self, task: &Arc<Task>) {
        let slice = priority_time_slice(self.config.time_slice(), task.priority());
        let Some(result) = self.dispatcher.dispatch(task, slice).await else {
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
            error!("priority signal channel already taken, dispatch loop not started");
            return;
        };

        let mut ticker = tokio::time::interval(self.config.time_slice());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!(time_slice_ms = self.config.time_slice_ms, "priority dispatch loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(task) = self.next_ready() {
                        self.run_once(&task).await;
                    }
                }
                // A wake still dispatches by priority, not the signalled task
                Some(_) = signals.recv() => {
                    if let Some(task) = self.next_ready() {
                        self.run_once(&task).await;
                    }
                }
            }
        }

        *self.signal_rx.lock() = Some(signals);
        info!("priority dispatch loop stopped");
    }
}

#[async_trait]
impl SchedulingAlgorithm for PriorityScheduler {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Priority
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
        self.core.state.lock().tasks.values().map(|t| t.snapshot()).collect()
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
