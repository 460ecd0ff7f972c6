//! Observable operation state
//!
//! Each component owns a single `StateCell` that broadcasts its lifecycle to
//! UI/coordination layers. The cell holds the *last applied transition*, not a
//! per-call status: concurrent calls race on it and the observed value is the
//! most recent write. Callers that need a per-call outcome await the result
//! returned by the operation itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle state of the most recent operation on a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// No operation has run, or the last one ended without a definite outcome
    Inactive,
    /// An operation is in flight
    Loading,
    /// The last operation completed
    Success,
    /// The last operation failed
    Error,
    /// The last operation was refused by the user (permission denial)
    Unauthorized,
}

/// Shared mutable state cell with watch-channel observers
///
/// Writes come only from the owning component; `subscribe` hands out read-only
/// receivers that wake on every transition.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<OperationState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(OperationState::Inactive);
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current state
    pub fn current(&self) -> OperationState {
        *self.tx.borrow()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, state: OperationState) {
        self.tx.send_replace(state);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_inactive() {
        let cell = StateCell::new();
        assert_eq!(cell.current(), OperationState::Inactive);
    }

    #[tokio::test]
    async fn observers_see_transitions() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        cell.set(OperationState::Loading);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), OperationState::Loading);

        cell.set(OperationState::Success);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), OperationState::Success);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cell = StateCell::new();
        cell.set(OperationState::Loading);
        cell.set(OperationState::Error);
        cell.set(OperationState::Success);
        assert_eq!(cell.current(), OperationState::Success);
    }
}
