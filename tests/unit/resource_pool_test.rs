//! Tests for the resource pool

use std::time::Duration;

use prometheus_sandbox_scheduler::config::ResourceLimits;
use prometheus_sandbox_scheduler::core::{AdmissionDenial, ResourcePool};

fn limits(max_tasks: usize) -> ResourceLimits {
    ResourceLimits {
        max_memory: 1000,
        max_cpu_time_ms: 1000,
        max_tasks,
        time_slice_ms: 10,
    }
}

#[test]
fn test_admission_never_exceeds_ceilings() {
    let pool = ResourcePool::new(&limits(3));
    let mut granted = 0;
    for _ in 0..10 {
        if pool.try_allocate(300, Duration::ZERO).is_ok() {
            granted += 1;
        }
        let usage = pool.usage();
        assert!(usage.active_tasks <= usage.max_tasks);
        assert!(usage.memory_used <= usage.memory_total);
    }
    assert_eq!(granted, 3);
}

#[test]
fn test_memory_denial_reports_available() {
    let pool = ResourcePool::new(&limits(10));
    pool.try_allocate(800, Duration::ZERO).unwrap();
    assert_eq!(
        pool.try_allocate(300, Duration::ZERO).unwrap_err(),
        AdmissionDenial::Memory {
            requested: 300,
            available: 200
        }
    );
}

#[test]
fn test_can_allocate_is_pure() {
    let pool = ResourcePool::new(&limits(1));
    assert!(pool.can_allocate(10, Duration::from_millis(10)));
    assert!(pool.can_allocate(10, Duration::from_millis(10)));
    assert_eq!(pool.usage().active_tasks, 0);
}

#[test]
fn test_reconcile_overwrites_drift() {
    let pool = ResourcePool::new(&limits(5));
    pool.allocate(100, Duration::ZERO);
    pool.allocate(100, Duration::ZERO);
    pool.reconcile(42, 1);

    let usage = pool.usage();
    assert_eq!(usage.memory_used, 42);
    assert_eq!(usage.active_tasks, 1);
    assert!((usage.task_utilization() - 0.2).abs() < f64::EPSILON);
    assert!((usage.memory_utilization() - 0.042).abs() < 1e-9);
}

#[test]
fn test_usage_serializes_for_reporting() {
    let pool = ResourcePool::new(&limits(4));
    pool.try_allocate(250, Duration::ZERO).unwrap();

    let json = serde_json::to_value(pool.usage()).unwrap();
    assert_eq!(json["memory_used"], 250);
    assert_eq!(json["memory_total"], 1000);
    assert_eq!(json["active_tasks"], 1);
    assert_eq!(json["max_tasks"], 4);
}
