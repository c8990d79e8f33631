//! Tests for audit sink

use prometheus_sandbox_scheduler::core::{build_audit_event, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        "evt1",
        "task1",
        "round-robin",
        "schedule",
        Some("detail".to_string()),
    );

    sink.record(event);
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, "evt1");
    assert_eq!(events[0].task_id, "task1");
    assert_eq!(events[0].action, "schedule");
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("evt1", "task1", "priority", "schedule", None));
    sink.record(build_audit_event("evt2", "task2", "priority", "schedule", None));
    sink.record(build_audit_event("evt3", "task3", "priority", "schedule", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_id, "evt2"); // First one popped
    assert_eq!(events[1].event_id, "evt3");
}

#[test]
fn test_events_with_action_filters() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event("evt1", "task1", "cooperative", "schedule", None));
    sink.record(build_audit_event("evt2", "task1", "cooperative", "overrun", None));

    let overruns = sink.events_with_action("overrun");
    assert_eq!(overruns.len(), 1);
    assert_eq!(overruns[0].event_id, "evt2");
    assert_eq!(overruns[0].algorithm, "cooperative");
    assert!(overruns[0].created_at_ms > 0);
    assert!(sink.events_with_action("completed").is_empty());
}
