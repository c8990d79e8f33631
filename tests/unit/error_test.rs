//! Tests for error types

use std::time::Duration;

use prometheus_sandbox_scheduler::core::{AdmissionDenial, SchedulerError, TaskId};

#[test]
fn test_max_tasks_reached_error() {
    let err = SchedulerError::MaxTasksReached;
    assert_eq!(format!("{}", err), "maximum number of tasks reached");
}

#[test]
fn test_task_not_found_error() {
    let id = TaskId::new();
    let err = SchedulerError::TaskNotFound(id);
    assert_eq!(format!("{}", err), format!("task not found: {id}"));
}

#[test]
fn test_unsupported_error() {
    let err = SchedulerError::Unsupported {
        algorithm: "round-robin",
        operation: "set_priority",
    };
    assert_eq!(
        format!("{}", err),
        "set_priority is not supported by the round-robin algorithm"
    );
}

#[test]
fn test_task_slot_denial_maps_to_max_tasks() {
    let err: SchedulerError = AdmissionDenial::TaskSlots { active: 2, max: 2 }.into();
    assert_eq!(err, SchedulerError::MaxTasksReached);
}

#[test]
fn test_memory_and_cpu_denial_map_to_resource_exhausted() {
    let err: SchedulerError = AdmissionDenial::Memory {
        requested: 10,
        available: 4,
    }
    .into();
    assert_eq!(
        err,
        SchedulerError::ResourceExhausted("memory: requested 10 bytes, available 4".to_string())
    );

    let err: SchedulerError = AdmissionDenial::Cpu {
        requested: Duration::from_secs(2),
        available: Duration::from_secs(1),
    }
    .into();
    assert!(matches!(err, SchedulerError::ResourceExhausted(msg) if msg.starts_with("cpu:")));
}
