//! Audit sink implementations.
//!
//! Algorithms record task lifecycle events here. This is the channel through
//! which callers learn about asynchronous outcomes such as a task being
//! terminated for exceeding its CPU budget.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: String,
    /// Algorithm that produced the event.
    pub algorithm: String,
    /// Action taken (schedule, unschedule, completed, cpu_limit_exceeded, overrun, shutdown).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Shared handle to an audit sink.
pub type SharedAuditSink = Arc<dyn AuditSink>;

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events whose action equals `action`.
    #[must_use]
    pub fn events_with_action(&self, action: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    event_id: impl Into<String>,
    task_id: impl Into<String>,
    algorithm: impl Into<String>,
    action: impl Into<String>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: event_id.into(),
        task_id: task_id.into(),
        algorithm: algorithm.into(),
        action: action.into(),
        created_at_ms: now_ms(),
        detail,
    }
}
