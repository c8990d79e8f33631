//! Build scheduling algorithms and task managers from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::SchedulerConfig;
use crate::core::{Algorithm, ExecutionBackend, SchedulerError, TaskManager};

/// Validate `cfg` and construct the algorithm it selects.
///
/// # Errors
///
/// `InvalidConfig` if validation fails.
pub fn build_algorithm(
    cfg: &SchedulerConfig,
    backend: Arc<dyn ExecutionBackend>,
) -> Result<Algorithm, SchedulerError> {
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;
    info!(
        algorithm = %cfg.algorithm,
        time_slice_ms = cfg.time_slice_ms,
        max_tasks = cfg.resource_limits.max_tasks,
        "building scheduling algorithm"
    );
    Ok(Algorithm::new(cfg.clone(), backend))
}

/// Validate `cfg` and construct a stopped [`TaskManager`] around the
/// algorithm it selects.
///
/// # Errors
///
/// `InvalidConfig` if validation fails.
pub fn build_task_manager(
    cfg: &SchedulerConfig,
    backend: Arc<dyn ExecutionBackend>,
) -> Result<TaskManager, SchedulerError> {
    let algorithm = build_algorithm(cfg, backend)?;
    Ok(TaskManager::with_algorithm(algorithm, cfg.clone()))
}
