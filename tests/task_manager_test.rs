//! Integration tests for the task manager façade.
//!
//! This test validates:
//! 1. Admission caps live tasks at `max_tasks` and frees slots on destroy
//! 2. Destroy is final and the instance map is authoritative
//! 3. Start/stop are sequenced for every algorithm
//! 4. Reconciliation reaps force-terminated tasks and resets pool counters
//! 5. Algorithm-specific operations are routed or rejected

mod common;

use std::sync::Arc;
use std::time::Duration;

use prometheus_sandbox_scheduler::builders::build_task_manager;
use prometheus_sandbox_scheduler::config::AlgorithmKind;
use prometheus_sandbox_scheduler::core::{
    ModuleId, SchedulerError, SchedulingAlgorithm, SimulatedBackend, TaskManager, TaskState,
};

use common::{backend, fast_config, wait_until, within};

fn manager(algorithm: AlgorithmKind, max_tasks: usize, max_cpu_ms: u64) -> TaskManager {
    build_task_manager(
        &fast_config(algorithm, max_tasks, max_cpu_ms),
        backend(
            SimulatedBackend::new()
                .with_work(Duration::from_millis(2))
                .with_memory(1024),
        ),
    )
    .unwrap()
}

#[test]
fn test_max_tasks_scenario() {
    let m = manager(AlgorithmKind::RoundRobin, 2, 60_000);
    let t1 = m.create_task(ModuleId::new(), 1).unwrap();
    let _t2 = m.create_task(ModuleId::new(), 1).unwrap();
    assert_eq!(
        m.create_task(ModuleId::new(), 1).unwrap_err(),
        SchedulerError::MaxTasksReached
    );
    assert_eq!(m.list_tasks().len(), 2);

    m.destroy_task(t1.id).unwrap();
    let t3 = m.create_task(ModuleId::new(), 1).unwrap();
    assert_eq!(m.get_task(t3.id).unwrap().state, TaskState::Ready);
}

#[test]
fn test_admission_invariant_under_repeated_creates() {
    for kind in AlgorithmKind::ALL {
        let m = manager(kind, 5, 60_000);
        let mut created = Vec::new();
        for _ in 0..12 {
            if let Ok(task) = m.create_task(ModuleId::new(), 3) {
                created.push(task.id);
            }
            let usage = m.get_resource_usage();
            assert!(usage.active_tasks <= usage.max_tasks);
            assert!(usage.memory_used <= usage.memory_total);
        }
        assert_eq!(created.len(), 5);
        assert_eq!(m.algorithm().list_tasks().len(), 5);
    }
}

#[test]
fn test_destroy_is_final() {
    let m = manager(AlgorithmKind::Priority, 4, 60_000);
    let task = m.create_task(ModuleId::new(), 4).unwrap();
    m.destroy_task(task.id).unwrap();

    assert_eq!(
        m.destroy_task(task.id).unwrap_err(),
        SchedulerError::TaskNotFound(task.id)
    );
    assert_eq!(m.get_task(task.id).unwrap_err(), SchedulerError::TaskNotFound(task.id));
    assert!(m.list_tasks().is_empty());
    assert!(m.algorithm().list_tasks().is_empty());
    assert_eq!(m.get_resource_usage().active_tasks, 0);
}

#[test]
fn test_list_tasks_oldest_first() {
    let m = manager(AlgorithmKind::RoundRobin, 4, 60_000);
    let first = m.create_task(ModuleId::new(), 1).unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let second = m.create_task(ModuleId::new(), 1).unwrap();

    let ids: Vec<_> = m.list_tasks().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[test]
fn test_algorithm_specific_operations() {
    let rr = manager(AlgorithmKind::RoundRobin, 4, 60_000);
    let task = rr.create_task(ModuleId::new(), 1).unwrap();
    assert!(matches!(
        rr.set_priority(task.id, 9),
        Err(SchedulerError::Unsupported { operation: "set_priority", .. })
    ));
    assert!(matches!(
        rr.yield_task(task.id),
        Err(SchedulerError::Unsupported { operation: "yield_task", .. })
    ));

    let prio = manager(AlgorithmKind::Priority, 4, 60_000);
    let task = prio.create_task(ModuleId::new(), 1).unwrap();
    prio.set_priority(task.id, 9).unwrap();
    assert_eq!(prio.get_task(task.id).unwrap().priority, 9);
}

#[tokio::test]
async fn test_lifecycle_sequencing_for_every_algorithm() {
    for kind in AlgorithmKind::ALL {
        let m = manager(kind, 4, 60_000);
        assert_eq!(within(m.stop()).await.unwrap_err(), SchedulerError::NotRunning);

        within(m.start()).await.unwrap();
        assert!(m.is_running());
        assert!(m.algorithm().is_running());
        assert_eq!(within(m.start()).await.unwrap_err(), SchedulerError::AlreadyRunning);
        assert!(m.algorithm().is_running());

        within(m.stop()).await.unwrap();
        assert!(!m.is_running());
        assert!(!m.algorithm().is_running());
        assert_eq!(within(m.stop()).await.unwrap_err(), SchedulerError::NotRunning);
    }
}

#[tokio::test]
async fn test_stop_terminates_and_settles_pool() {
    let m = manager(AlgorithmKind::RoundRobin, 4, 60_000);
    within(m.start()).await.unwrap();
    for _ in 0..3 {
        m.create_task(ModuleId::new(), 1).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || !m.get_metrics().is_empty()
        && m.get_metrics().values().any(|metrics| metrics.switches > 0))
    .await);

    within(m.stop()).await.unwrap();
    assert!(m.list_tasks().is_empty());
    let usage = m.get_resource_usage();
    assert_eq!(usage.active_tasks, 0);
    assert_eq!(usage.memory_used, 0);
    assert!(m.get_metrics().is_empty());
}

#[tokio::test]
async fn test_reconciliation_reaps_cpu_limited_tasks() {
    let m = manager(AlgorithmKind::RoundRobin, 4, 30);
    within(m.start()).await.unwrap();
    let task = m.create_task(ModuleId::new(), 1).unwrap();

    assert!(wait_until(Duration::from_secs(3), || m.get_task(task.id).is_err()).await);
    assert!(m.list_tasks().is_empty());
    assert_eq!(m.get_resource_usage().active_tasks, 0);

    // Slot is free again
    m.create_task(ModuleId::new(), 1).unwrap();
    within(m.stop()).await.unwrap();
}

#[tokio::test]
async fn test_reconciliation_picks_up_reported_memory() {
    let m = manager(AlgorithmKind::Cooperative, 4, 60_000);
    let task = m.create_task(ModuleId::new(), 1).unwrap();
    assert_eq!(m.get_resource_usage().memory_used, 0);

    within(m.start()).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        m.get_task(task.id).map(|t| t.memory_usage).unwrap_or_default() == 1024
    })
    .await);
    m.reconcile();
    assert_eq!(m.get_resource_usage().memory_used, 1024);

    within(m.stop()).await.unwrap();
}

#[tokio::test]
async fn test_destroy_running_task() {
    let m = manager(AlgorithmKind::Cooperative, 4, 60_000);
    within(m.start()).await.unwrap();
    let task = m.create_task(ModuleId::new(), 1).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        m.get_task(task.id).map(|t| t.state == TaskState::Running).unwrap_or(false)
    })
    .await);
    m.destroy_task(task.id).unwrap();
    assert!(m.list_tasks().is_empty());
    assert!(m.algorithm().list_tasks().is_empty());

    within(m.stop()).await.unwrap();
}

#[test]
fn test_metrics_disabled() {
    let mut config = fast_config(AlgorithmKind::RoundRobin, 4, 60_000);
    config.metrics_enabled = false;
    let m = TaskManager::new(config, Arc::new(SimulatedBackend::new()));
    m.create_task(ModuleId::new(), 1).unwrap();
    assert!(m.get_metrics().is_empty());
}
