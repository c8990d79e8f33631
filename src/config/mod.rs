//! Configuration models for the scheduler and its resource limits.

pub mod scheduler;

pub use scheduler::{AlgorithmKind, ResourceLimits, SchedulerConfig};
