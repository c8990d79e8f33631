//! # Prometheus Sandbox Scheduler
//!
//! Scheduling and resource supervision for sandboxed module instances.
//!
//! Every sandboxed module instance is a [`crate::core::Task`]. The scheduler decides
//! when each task runs, for how long, and when it has used up its budget. The
//! execution of module code itself is delegated to an
//! [`crate::core::ExecutionBackend`]; the scheduler only orchestrates and accounts.
//!
//! ## Core Problem Solved
//!
//! Sandboxed workloads share a host with fixed limits:
//!
//! - **Memory**: the sum of instance footprints must stay under a ceiling
//! - **CPU time**: a single instance must not run forever
//! - **Concurrency**: only so many instances may be live at once
//!
//! ## Key Features
//!
//! - **Admission Control**: a [`crate::core::ResourcePool`] checks memory, CPU and
//!   task-slot ceilings before a task is created
//! - **Pluggable Disciplines**: round-robin, cooperative and priority
//!   scheduling behind one [`crate::core::SchedulingAlgorithm`] trait
//! - **CPU Budget Enforcement**: tasks exceeding `max_cpu_time` are
//!   terminated after the offending dispatch
//! - **Reconciliation**: the [`crate::core::TaskManager`] periodically resets pool
//!   counters from live task state
//! - **Audit Hook**: forced terminations are reported through an
//!   [`crate::core::AuditSink`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_sandbox_scheduler::builders::build_task_manager;
//! use prometheus_sandbox_scheduler::config::{AlgorithmKind, SchedulerConfig};
//! use prometheus_sandbox_scheduler::core::{ModuleId, SimulatedBackend};
//!
//! let config = SchedulerConfig {
//!     algorithm: AlgorithmKind::Priority,
//!     ..SchedulerConfig::default()
//! };
//! let manager = build_task_manager(&config, Arc::new(SimulatedBackend::new()))?;
//! manager.start().await?;
//!
//! let task = manager.create_task(ModuleId::new(), 8)?;
//! println!("{:?}", manager.get_resource_usage());
//!
//! manager.destroy_task(task.id)?;
//! manager.stop().await?;
//! ```
//!
//! For complete scenarios see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, algorithms and capacity accounting.
pub mod core;
/// Configuration models for the scheduler and its resource limits.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
