//! Aggregate resource accounting and admission control.
//!
//! The pool is the single source of truth for admission decisions. It is
//! advisory for already-admitted tasks: counters may drift while tasks run and
//! are periodically overwritten with ground truth by the task manager's
//! reconciliation loop.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ResourceLimits;
use crate::core::SchedulerError;

/// Why an allocation request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionDenial {
    /// Granting would exceed the memory ceiling.
    #[error("memory: requested {requested} bytes, available {available}")]
    Memory {
        /// Bytes requested.
        requested: u64,
        /// Bytes still available.
        available: u64,
    },
    /// Granting would exceed the CPU ceiling.
    #[error("cpu: requested {requested:?}, available {available:?}")]
    Cpu {
        /// CPU time requested.
        requested: Duration,
        /// CPU time still available.
        available: Duration,
    },
    /// The active-task ceiling is reached.
    #[error("task slots: {active} of {max} in use")]
    TaskSlots {
        /// Tasks currently counted as active.
        active: usize,
        /// Configured ceiling.
        max: usize,
    },
}

impl From<AdmissionDenial> for SchedulerError {
    fn from(denial: AdmissionDenial) -> Self {
        match denial {
            AdmissionDenial::TaskSlots { .. } => Self::MaxTasksReached,
            other => Self::ResourceExhausted(other.to_string()),
        }
    }
}

/// Read-only view of pool usage for the metrics/reporting layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Memory in use, bytes.
    pub memory_used: u64,
    /// Memory ceiling, bytes.
    pub memory_total: u64,
    /// CPU time in use.
    pub cpu_used: Duration,
    /// CPU ceiling.
    pub cpu_total: Duration,
    /// Tasks counted as active.
    pub active_tasks: usize,
    /// Task ceiling.
    pub max_tasks: usize,
}

#[allow(clippy::cast_precision_loss)]
impl ResourceUsage {
    /// Fraction of memory in use, 0 when the ceiling is 0.
    #[must_use]
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_total == 0 {
            return 0.0;
        }
        self.memory_used as f64 / self.memory_total as f64
    }

    /// Fraction of CPU in use, 0 when the ceiling is 0.
    #[must_use]
    pub fn cpu_utilization(&self) -> f64 {
        if self.cpu_total.is_zero() {
            return 0.0;
        }
        self.cpu_used.as_secs_f64() / self.cpu_total.as_secs_f64()
    }

    /// Fraction of task slots in use, 0 when the ceiling is 0.
    #[must_use]
    pub fn task_utilization(&self) -> f64 {
        if self.max_tasks == 0 {
            return 0.0;
        }
        self.active_tasks as f64 / self.max_tasks as f64
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    used_memory: u64,
    used_cpu: Duration,
    active_tasks: usize,
}

/// Aggregate memory/CPU/task-count counters checked against [`ResourceLimits`].
///
/// All mutation happens under one pool-wide `parking_lot::Mutex`.
#[derive(Debug)]
pub struct ResourcePool {
    total_memory: u64,
    total_cpu: Duration,
    max_tasks: usize,
    counters: Mutex<PoolCounters>,
}

impl ResourcePool {
    /// Create an empty pool for `limits`.
    ///
    /// The CPU ceiling is the per-task budget `max_cpu_time`.
    #[must_use]
    pub fn new(limits: &ResourceLimits) -> Self {
        Self {
            total_memory: limits.max_memory,
            total_cpu: limits.max_cpu_time(),
            max_tasks: limits.max_tasks,
            counters: Mutex::new(PoolCounters::default()),
        }
    }

    fn check(&self, counters: &PoolCounters, memory: u64, cpu: Duration) -> Result<(), AdmissionDenial> {
        let available_memory = self.total_memory.saturating_sub(counters.used_memory);
        if memory > available_memory {
            return Err(AdmissionDenial::Memory {
                requested: memory,
                available: available_memory,
            });
        }
        let available_cpu = self.total_cpu.saturating_sub(counters.used_cpu);
        if cpu > available_cpu {
            return Err(AdmissionDenial::Cpu {
                requested: cpu,
                available: available_cpu,
            });
        }
        if counters.active_tasks >= self.max_tasks {
            return Err(AdmissionDenial::TaskSlots {
                active: counters.active_tasks,
                max: self.max_tasks,
            });
        }
        Ok(())
    }

    /// Whether `memory` and `cpu` could be granted and a task slot is free.
    /// Pure query.
    #[must_use]
    pub fn can_allocate(&self, memory: u64, cpu: Duration) -> bool {
        let counters = self.counters.lock();
        self.check(&counters, memory, cpu).is_ok()
    }

    /// Unconditionally add to the counters and take a task slot.
    ///
    /// Callers must have just passed [`ResourcePool::can_allocate`] under a lock
    /// they hold across both calls; prefer [`ResourcePool::try_allocate`].
    pub fn allocate(&self, memory: u64, cpu: Duration) {
        let mut counters = self.counters.lock();
        counters.used_memory = counters.used_memory.saturating_add(memory);
        counters.used_cpu = counters.used_cpu.saturating_add(cpu);
        counters.active_tasks += 1;
    }

    /// Check and allocate under one lock acquisition.
    ///
    /// # Errors
    ///
    /// Returns the first limit the request would violate.
    pub fn try_allocate(&self, memory: u64, cpu: Duration) -> Result<(), AdmissionDenial> {
        let mut counters = self.counters.lock();
        self.check(&counters, memory, cpu)?;
        counters.used_memory = counters.used_memory.saturating_add(memory);
        counters.used_cpu = counters.used_cpu.saturating_add(cpu);
        counters.active_tasks += 1;
        Ok(())
    }

    /// Release `memory` and `cpu` and one task slot. Saturates at zero, since
    /// callers may not know the exact original amounts.
    pub fn deallocate(&self, memory: u64, cpu: Duration) {
        let mut counters = self.counters.lock();
        counters.used_memory = counters.used_memory.saturating_sub(memory);
        counters.used_cpu = counters.used_cpu.saturating_sub(cpu);
        counters.active_tasks = counters.active_tasks.saturating_sub(1);
    }

    /// Overwrite memory and task counters with ground-truth figures.
    pub fn reconcile(&self, used_memory: u64, active_tasks: usize) {
        let mut counters = self.counters.lock();
        counters.used_memory = used_memory;
        counters.active_tasks = active_tasks;
    }

    /// Current usage.
    #[must_use]
    pub fn usage(&self) -> ResourceUsage {
        let counters = self.counters.lock();
        ResourceUsage {
            memory_used: counters.used_memory,
            memory_total: self.total_memory,
            cpu_used: counters.used_cpu,
            cpu_total: self.total_cpu,
            active_tasks: counters.active_tasks,
            max_tasks: self.max_tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_memory: 1024,
            max_cpu_time_ms: 10_000,
            max_tasks: 5,
            time_slice_ms: 100,
        }
    }

    #[test]
    fn test_allocate_and_deallocate() {
        let pool = ResourcePool::new(&limits());
        assert!(pool.can_allocate(512, Duration::from_secs(2)));
        pool.allocate(512, Duration::from_secs(2));

        let usage = pool.usage();
        assert_eq!(usage.memory_used, 512);
        assert_eq!(usage.cpu_used, Duration::from_secs(2));
        assert_eq!(usage.active_tasks, 1);

        assert!(!pool.can_allocate(1024, Duration::ZERO));

        pool.deallocate(512, Duration::from_secs(2));
        let usage = pool.usage();
        assert_eq!(usage.memory_used, 0);
        assert_eq!(usage.active_tasks, 0);
    }

    #[test]
    fn test_task_slot_ceiling() {
        let pool = ResourcePool::new(&limits());
        for _ in 0..5 {
            pool.try_allocate(0, Duration::ZERO).unwrap();
        }
        let err = pool.try_allocate(0, Duration::ZERO).unwrap_err();
        assert_eq!(err, AdmissionDenial::TaskSlots { active: 5, max: 5 });
        assert_eq!(SchedulerError::from(err), SchedulerError::MaxTasksReached);
    }

    #[test]
    fn test_memory_denial_maps_to_resource_exhausted() {
        let pool = ResourcePool::new(&limits());
        let err = pool.try_allocate(2048, Duration::ZERO).unwrap_err();
        assert!(matches!(err, AdmissionDenial::Memory { requested: 2048, available: 1024 }));
        assert!(matches!(SchedulerError::from(err), SchedulerError::ResourceExhausted(_)));
        assert_eq!(pool.usage().active_tasks, 0);
    }

    #[test]
    fn test_deallocate_tolerates_drift() {
        let pool = ResourcePool::new(&limits());
        pool.deallocate(100, Duration::from_secs(1));
        let usage = pool.usage();
        assert_eq!(usage.memory_used, 0);
        assert_eq!(usage.cpu_used, Duration::ZERO);
        assert_eq!(usage.active_tasks, 0);
    }

    #[test]
    fn test_reconcile_overwrites_counters() {
        let pool = ResourcePool::new(&limits());
        pool.allocate(10, Duration::ZERO);
        pool.allocate(10, Duration::ZERO);
        pool.reconcile(300, 1);
        let usage = pool.usage();
        assert_eq!(usage.memory_used, 300);
        assert_eq!(usage.active_tasks, 1);
    }

    #[test]
    fn test_utilization_ratios() {
        let usage = ResourceUsage {
            memory_used: 256,
            memory_total: 1024,
            cpu_used: Duration::from_secs(5),
            cpu_total: Duration::from_secs(10),
            active_tasks: 1,
            max_tasks: 4,
        };
        assert!((usage.memory_utilization() - 0.25).abs() < f64::EPSILON);
        assert!((usage.cpu_utilization() - 0.5).abs() < f64::EPSILON);
        assert!((usage.task_utilization() - 0.25).abs() < f64::EPSILON);

        let empty = ResourceUsage {
            memory_used: 0,
            memory_total: 0,
            cpu_used: Duration::ZERO,
            cpu_total: Duration::ZERO,
            active_tasks: 0,
            max_tasks: 0,
        };
        assert_eq!(empty.memory_utilization(), 0.0);
        assert_eq!(empty.cpu_utilization(), 0.0);
        assert_eq!(empty.task_utilization(), 0.0);
    }
}
