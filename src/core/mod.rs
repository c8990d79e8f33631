//! Core scheduling abstractions, algorithms and capacity accounting.

pub mod algorithm;
pub mod audit;
pub mod backend;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod resource_pool;
pub mod task;

pub use algorithm::{
    priority_time_slice, Algorithm, CooperativeScheduler, PriorityScheduler,
    RoundRobinScheduler, SchedulingAlgorithm,
};
pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, SharedAuditSink};
pub use backend::{
    DispatchRequest, ExecutionBackend, ExecutionOutcome, ExecutionReport, SimulatedBackend,
};
pub use dispatch::{DispatchOutcome, TerminationReason};
pub use error::{AppResult, SchedulerError};
pub use manager::TaskManager;
pub use resource_pool::{AdmissionDenial, ResourcePool, ResourceUsage};
pub use task::{ModuleId, Task, TaskId, TaskMetrics, TaskSnapshot, TaskState};
