//! Tests for configuration validation

use std::time::Duration;

use prometheus_sandbox_scheduler::config::{AlgorithmKind, ResourceLimits, SchedulerConfig};
use prometheus_sandbox_scheduler::core::SchedulerError;

#[test]
fn test_default_config() {
    let config = SchedulerConfig::default();
    assert_eq!(config.algorithm, AlgorithmKind::RoundRobin);
    assert_eq!(config.time_slice(), Duration::from_millis(100));
    assert_eq!(config.resource_limits.max_memory, 64 * 1024 * 1024);
    assert_eq!(config.resource_limits.max_cpu_time(), Duration::from_secs(30));
    assert_eq!(config.resource_limits.max_tasks, 100);
    assert!(config.metrics_enabled);
    assert_eq!(config.reconcile_interval(), Duration::from_secs(1));
    assert!(config.validate().is_ok());
}

#[test]
fn test_limits_invalid_max_tasks() {
    let limits = ResourceLimits {
        max_tasks: 0,
        ..ResourceLimits::default()
    };
    assert!(limits.validate().is_err());
}

#[test]
fn test_limits_invalid_cpu_time() {
    let limits = ResourceLimits {
        max_cpu_time_ms: 0,
        ..ResourceLimits::default()
    };
    assert!(limits.validate().is_err());
}

#[test]
fn test_config_invalid_time_slice() {
    let config = SchedulerConfig {
        time_slice_ms: 0,
        ..SchedulerConfig::default()
    };
    let err = config.validate().unwrap_err();
    assert!(err.contains("time slice"));
}

#[test]
fn test_config_rejects_mismatched_time_slices() {
    let mut config = SchedulerConfig {
        time_slice_ms: 50,
        ..SchedulerConfig::default()
    };
    let err = config.validate().unwrap_err();
    assert!(err.contains("time slice mismatch"), "{err}");

    config.resource_limits.time_slice_ms = 50;
    assert!(config.validate().is_ok());

    let json = r#"{
        "algorithm": "priority",
        "time_slice_ms": 20,
        "resource_limits": {
            "max_memory": 1048576,
            "max_cpu_time_ms": 1000,
            "max_tasks": 4,
            "time_slice_ms": 40
        },
        "metrics_enabled": true
    }"#;
    let err = SchedulerConfig::from_json_str(json).unwrap_err();
    assert!(err.contains("time slice mismatch"), "{err}");
}

#[test]
fn test_algorithm_kind_parse() {
    assert_eq!("round-robin".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::RoundRobin);
    assert_eq!("cooperative".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::Cooperative);
    assert_eq!("priority".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::Priority);
    assert_eq!(
        "lottery".parse::<AlgorithmKind>().unwrap_err(),
        SchedulerError::UnknownAlgorithm("lottery".to_string())
    );
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "algorithm": "priority",
        "time_slice_ms": 50,
        "resource_limits": {
            "max_memory": 1048576,
            "max_cpu_time_ms": 5000,
            "max_tasks": 8,
            "time_slice_ms": 50
        },
        "metrics_enabled": false
    }"#;

    let config = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(config.algorithm, AlgorithmKind::Priority);
    assert_eq!(config.resource_limits.max_tasks, 8);
    assert!(!config.metrics_enabled);
    assert_eq!(config.reconcile_interval_ms, 1_000);
}

#[test]
fn test_scheduler_config_from_json_unknown_algorithm() {
    let json = r#"{
        "algorithm": "lottery",
        "time_slice_ms": 50,
        "resource_limits": {
            "max_memory": 1048576,
            "max_cpu_time_ms": 5000,
            "max_tasks": 8,
            "time_slice_ms": 50
        },
        "metrics_enabled": true
    }"#;
    assert!(SchedulerConfig::from_json_str(json).is_err());
}

#[test]
fn test_config_from_env_overrides() {
    std::env::set_var("SANDBOX_SCHEDULER_ALGORITHM", "cooperative");
    std::env::set_var("SANDBOX_SCHEDULER_MAX_TASKS", "12");
    std::env::set_var("SANDBOX_SCHEDULER_TIME_SLICE_MS", "25");

    let config = SchedulerConfig::from_env().unwrap();
    assert_eq!(config.algorithm, AlgorithmKind::Cooperative);
    assert_eq!(config.resource_limits.max_tasks, 12);
    assert_eq!(config.time_slice_ms, 25);
    assert_eq!(config.resource_limits.time_slice_ms, 25);

    std::env::set_var("SANDBOX_SCHEDULER_MAX_TASKS", "many");
    let err = SchedulerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("SANDBOX_SCHEDULER_MAX_TASKS"));

    std::env::remove_var("SANDBOX_SCHEDULER_ALGORITHM");
    std::env::remove_var("SANDBOX_SCHEDULER_MAX_TASKS");
    std::env::remove_var("SANDBOX_SCHEDULER_TIME_SLICE_MS");
}
