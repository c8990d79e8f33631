//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_sandbox_scheduler::config::{AlgorithmKind, SchedulerConfig};
use prometheus_sandbox_scheduler::core::{DispatchRequest, ExecutionBackend, ExecutionReport};

/// Config with short slices so timer-driven behavior shows up quickly.
pub fn fast_config(algorithm: AlgorithmKind, max_tasks: usize, max_cpu_ms: u64) -> SchedulerConfig {
    let mut config = SchedulerConfig {
        algorithm,
        time_slice_ms: 10,
        reconcile_interval_ms: 20,
        ..SchedulerConfig::default()
    };
    config.resource_limits.max_tasks = max_tasks;
    config.resource_limits.max_cpu_time_ms = max_cpu_ms;
    config.resource_limits.time_slice_ms = 10;
    config
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Await `fut` or panic after a generous timeout.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation timed out")
}

/// Backend whose modules finish on their first dispatch.
pub struct CompletingBackend;

#[async_trait]
impl ExecutionBackend for CompletingBackend {
    async fn run(&self, _request: DispatchRequest) -> ExecutionReport {
        tokio::time::sleep(Duration::from_millis(1)).await;
        ExecutionReport::completed()
    }
}

/// Backend that never returns on its own; only the slice timer ends a dispatch.
pub struct HangingBackend;

#[async_trait]
impl ExecutionBackend for HangingBackend {
    async fn run(&self, _request: DispatchRequest) -> ExecutionReport {
        std::future::pending::<()>().await;
        ExecutionReport::yielded()
    }
}

/// Erase a concrete backend into the shared trait object.
pub fn backend<B: ExecutionBackend>(backend: B) -> Arc<dyn ExecutionBackend> {
    Arc::new(backend)
}
