//! Cooperative cancellation scope
//!
//! A scope is a one-way latch: once cancelled it stays cancelled. Clones
//! share the latch. Tasks race `cancelled()` against their blocking work in
//! `tokio::select!`.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub(crate) struct Scope {
    state: Arc<watch::Sender<bool>>,
}

impl Scope {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub(crate) fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the scope is cancelled
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let scope = Scope::new();
        let waiter = tokio::spawn({
            let scope = scope.clone();
            async move { scope.cancelled().await }
        });

        tokio::task::yield_now().await;
        assert!(!scope.is_cancelled());
        scope.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_scope_resolves_immediately() {
        let scope = Scope::new();
        scope.cancel();
        scope.cancel();
        assert!(scope.is_cancelled());
        scope.cancelled().await;
    }
}
