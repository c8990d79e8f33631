//! Task manager façade.
//!
//! The manager owns the authoritative instance map, wires one
//! [`Algorithm`] to one [`ResourcePool`], and runs a reconciliation loop that
//! periodically resets the pool's counters from live task state.
//!
//! Admission at creation time reserves a zero-sized allocation: real memory
//! figures only arrive once a task has been dispatched and the backend has
//! reported them. Until the next reconciliation the pool's memory counter can
//! therefore lag behind reality.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::algorithm::{Algorithm, SchedulingAlgorithm};
use crate::core::backend::ExecutionBackend;
use crate::core::dispatch::Lifecycle;
use crate::core::resource_pool::{ResourcePool, ResourceUsage};
use crate::core::task::{ModuleId, Task, TaskId, TaskMetrics, TaskSnapshot, TaskState};
use crate::core::SchedulerError;
use crate::util::cancel::CancelScope;

struct ManagerInner {
    config: SchedulerConfig,
    algorithm: Algorithm,
    pool: ResourcePool,
    instances: Mutex<HashMap<TaskId, Arc<Task>>>,
}

/// Creates, destroys and supervises tasks on top of a scheduling algorithm.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use prometheus_sandbox_scheduler::config::SchedulerConfig;
/// use prometheus_sandbox_scheduler::core::{ModuleId, SimulatedBackend, TaskManager};
///
/// let manager = TaskManager::new(SchedulerConfig::default(), Arc::new(SimulatedBackend::new()));
/// manager.start().await?;
/// let task = manager.create_task(ModuleId::new(), 5)?;
/// manager.destroy_task(task.id)?;
/// manager.stop().await?;
/// ```
pub struct TaskManager {
    inner: Arc<ManagerInner>,
    reconciler: Lifecycle,
}

impl TaskManager {
    /// Create a stopped manager running the algorithm selected by `config`.
    #[must_use]
    pub fn new(config: SchedulerConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        let algorithm = Algorithm::new(config.clone(), backend);
        Self::with_algorithm(algorithm, config)
    }

    /// Create a stopped manager around an already-built algorithm.
    #[must_use]
    pub fn with_algorithm(algorithm: Algorithm, config: SchedulerConfig) -> Self {
        let pool = ResourcePool::new(&config.resource_limits);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                algorithm,
                pool,
                instances: Mutex::new(HashMap::new()),
            }),
            reconciler: Lifecycle::new(),
        }
    }

    /// Configuration the manager was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// The active scheduling algorithm.
    #[must_use]
    pub fn algorithm(&self) -> &Algorithm {
        &self.inner.algorithm
    }

    /// Admit and schedule a new task for `module_id`.
    ///
    /// # Errors
    ///
    /// `MaxTasksReached` when either the pool's task-slot ceiling or the
    /// algorithm's queue is full, `ResourceExhausted` when memory or CPU
    /// admission fails. A rejected task leaves no trace behind.
    pub fn create_task(
        &self,
        module_id: ModuleId,
        priority: i32,
    ) -> Result<TaskSnapshot, SchedulerError> {
        let mut instances = self.inner.instances.lock();
        if let Err(denial) = self.inner.pool.try_allocate(0, Duration::ZERO) {
            warn!(module_id = %module_id, %denial, "task admission denied");
            return Err(denial.into());
        }

        let task = Arc::new(Task::new(module_id, priority));
        let task_id = task.id();
        instances.insert(task_id, Arc::clone(&task));

        if let Err(e) = self.inner.algorithm.schedule(Arc::clone(&task)) {
            instances.remove(&task_id);
            task.terminate();
            self.inner.pool.deallocate(0, Duration::ZERO);
            warn!(task_id = %task_id, error = %e, "algorithm rejected task, admission rolled back");
            return Err(e);
        }

        info!(task_id = %task_id, module_id = %module_id, priority, "task created");
        Ok(task.snapshot())
    }

    /// Unschedule `task_id`, release its footprint and forget it.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the id is not in the instance map.
    pub fn destroy_task(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let mut instances = self.inner.instances.lock();
        let Some(task) = instances.get(&task_id).cloned() else {
            return Err(SchedulerError::TaskNotFound(task_id));
        };

        match self.inner.algorithm.unschedule(task_id) {
            // Already removed by the algorithm after a forced termination
            Ok(()) | Err(SchedulerError::TaskNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        task.terminate();
        self.inner.pool.deallocate(task.memory_usage(), Duration::ZERO);
        instances.remove(&task_id);

        info!(task_id = %task_id, "task destroyed");
        Ok(())
    }

    /// Snapshot of one task.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the id is not in the instance map.
    pub fn get_task(&self, task_id: TaskId) -> Result<TaskSnapshot, SchedulerError> {
        self.inner
            .instances
            .lock()
            .get(&task_id)
            .map(|t| t.snapshot())
            .ok_or(SchedulerError::TaskNotFound(task_id))
    }

    /// Snapshots of every known task, oldest first.
    ///
    /// Tasks force-terminated since the last reconciliation are still listed
    /// with state `Terminated`.
    #[must_use]
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let mut tasks: Vec<_> = self
            .inner
            .instances
            .lock()
            .values()
            .map(|t| t.snapshot())
            .collect();
        tasks.sort_by_key(|t| t.created_at_ms);
        tasks
    }

    /// Per-task metrics from the algorithm. Empty when metrics are disabled.
    #[must_use]
    pub fn get_metrics(&self) -> HashMap<TaskId, TaskMetrics> {
        self.inner.algorithm.metrics_snapshot()
    }

    /// Pool-wide usage figures.
    #[must_use]
    pub fn get_resource_usage(&self) -> ResourceUsage {
        self.inner.pool.usage()
    }

    /// Re-prioritize a live task.
    ///
    /// # Errors
    ///
    /// `Unsupported` unless the priority algorithm is active, `TaskNotFound`
    /// for unknown ids.
    pub fn set_priority(&self, task_id: TaskId, priority: i32) -> Result<(), SchedulerError> {
        self.inner.algorithm.set_priority(task_id, priority)
    }

    /// Ask a running task to yield.
    ///
    /// # Errors
    ///
    /// `Unsupported` unless the cooperative algorithm is active,
    /// `TaskNotFound` or `TaskNotRunning` otherwise.
    pub fn yield_task(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        self.inner.algorithm.yield_task(task_id)
    }

    /// Recompute pool usage from live tasks and drop terminated instances.
    ///
    /// Runs periodically while the manager is started; callable directly.
    /// Returns the number of instances reaped.
    pub fn reconcile(&self) -> usize {
        self.inner.reconcile()
    }

    /// Start the reconciliation loop and the algorithm's dispatch loop.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started twice, `Runtime` outside a Tokio runtime.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let inner = Arc::clone(&self.inner);
        self.reconciler
            .start(move |shutdown| inner.reconcile_loop(shutdown))
            .await?;

        if let Err(e) = self.inner.algorithm.start().await {
            let _ = self.reconciler.stop(|| {}).await;
            return Err(e);
        }
        info!(algorithm = %self.inner.algorithm.kind(), "task manager started");
        Ok(())
    }

    /// Stop both loops, terminate every task and settle the pool.
    ///
    /// # Errors
    ///
    /// `NotRunning` if not started.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.reconciler.stop(|| {}).await?;
        let stopped = self.inner.algorithm.stop().await;
        self.inner.reconcile();
        info!("task manager stopped");
        stopped
    }

    /// Whether the manager has been started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.reconciler.is_running()
    }
}

impl ManagerInner {
    fn reconcile(&self) -> usize {
        let mut instances = self.instances.lock();
        let mut used_memory = 0_u64;
        let mut running = 0_usize;
        for task in instances.values() {
            let snapshot = task.snapshot();
            match snapshot.state {
                TaskState::Terminated => {}
                TaskState::Running => {
                    running += 1;
                    used_memory = used_memory.saturating_add(snapshot.memory_usage);
                }
                TaskState::Ready | TaskState::Suspended => {
                    used_memory = used_memory.saturating_add(snapshot.memory_usage);
                }
            }
        }
        self.pool.reconcile(used_memory, running);

        let before = instances.len();
        instances.retain(|_, t| t.state() != TaskState::Terminated);
        let reaped = before - instances.len();
        if reaped > 0 {
            debug!(reaped, "reaped terminated instances");
        }
        reaped
    }

    async fn reconcile_loop(self: Arc<Self>, shutdown: CancelScope) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!(
            interval_ms = self.config.reconcile_interval_ms,
            "reconciliation loop started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.reconcile();
                }
            }
        }
        info!("reconciliation loop stopped");
    }
}
