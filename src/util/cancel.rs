//! Cooperative cancellation scopes.
//!
//! A [`CancelScope`] is a cloneable, one-shot signal built on
//! `tokio::sync::watch`. Every task owns one for its whole life; each dispatch
//! derives a [`CancelScope::child`] that is released when the time slice
//! ends, so an execution backend only has to watch a single scope.

use std::future::{poll_fn, Future};
use std::sync::Arc;
use std::task::Poll;

use tokio::sync::watch;

/// Cloneable cooperative cancellation signal.
///
/// Clones share the same underlying flag. A child scope observes its own flag
/// and every ancestor's flag, but cancelling a child never affects the parent.
#[derive(Debug, Clone)]
pub struct CancelScope {
    /// Own flag first, then ancestors from nearest to root.
    flags: Vec<Arc<watch::Sender<bool>>>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelScope {
    /// Create a fresh, uncancelled root scope.
    #[must_use]
    pub fn new() -> Self {
        let (flag, _rx) = watch::channel(false);
        Self {
            flags: vec![Arc::new(flag)],
        }
    }

    /// Derive a scope that is cancelled when either it or `self` is cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        let (flag, _rx) = watch::channel(false);
        let mut flags = Vec::with_capacity(self.flags.len() + 1);
        flags.push(Arc::new(flag));
        flags.extend(self.flags.iter().cloned());
        Self { flags }
    }

    /// Release the scope.
    ///
    /// Returns `true` only for the call that performed the release; later
    /// calls (from any clone) return `false`.
    pub fn cancel(&self) -> bool {
        !self.flags[0].send_replace(true)
    }

    /// Whether this scope or any ancestor has been released.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|flag| *flag.borrow())
    }

    /// Resolve once this scope or any ancestor is released.
    pub async fn cancelled(&self) {
        let mut receivers: Vec<_> = self.flags.iter().map(|flag| flag.subscribe()).collect();
        let mut waits: Vec<_> = receivers
            .iter_mut()
            .map(|rx| Box::pin(rx.wait_for(|released| *released)))
            .collect();
        poll_fn(|cx| {
            for wait in &mut waits {
                if wait.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(());
                }
            }
            Poll::Pending
        })
        .await;
    }
}
