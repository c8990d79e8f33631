//! Tests for builder modules

use std::sync::Arc;

use prometheus_sandbox_scheduler::builders::{build_algorithm, build_task_manager};
use prometheus_sandbox_scheduler::config::{AlgorithmKind, SchedulerConfig};
use prometheus_sandbox_scheduler::core::{SchedulerError, SchedulingAlgorithm, SimulatedBackend};

#[test]
fn test_build_algorithm_selects_variant() {
    for kind in AlgorithmKind::ALL {
        let config = SchedulerConfig {
            algorithm: kind,
            ..SchedulerConfig::default()
        };
        let algorithm = build_algorithm(&config, Arc::new(SimulatedBackend::new())).unwrap();
        assert_eq!(algorithm.kind(), kind);
        assert!(!algorithm.is_running());
    }
}

#[test]
fn test_build_algorithm_rejects_invalid_config() {
    let config = SchedulerConfig {
        time_slice_ms: 0,
        ..SchedulerConfig::default()
    };
    let result = build_algorithm(&config, Arc::new(SimulatedBackend::new()));
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_build_task_manager() {
    let mut config = SchedulerConfig::default();
    config.algorithm = AlgorithmKind::Cooperative;
    config.resource_limits.max_tasks = 3;

    let manager = build_task_manager(&config, Arc::new(SimulatedBackend::new())).unwrap();
    assert_eq!(manager.algorithm().kind(), AlgorithmKind::Cooperative);
    assert_eq!(manager.get_resource_usage().max_tasks, 3);
    assert!(!manager.is_running());
}
