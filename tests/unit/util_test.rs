//! Tests for utility functions

use std::time::Duration;

use prometheus_sandbox_scheduler::util::{init_tracing, now_ms, CancelScope};

#[test]
fn test_now_ms() {
    assert!(now_ms() > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_is_repeatable() {
    init_tracing();
    init_tracing();
}

#[tokio::test]
async fn test_grandchild_observes_root() {
    let root = CancelScope::new();
    let child = root.child();
    let grandchild = child.child();

    assert!(root.cancel());
    assert!(grandchild.is_cancelled());
    tokio::time::timeout(Duration::from_millis(100), grandchild.cancelled())
        .await
        .unwrap();
}
