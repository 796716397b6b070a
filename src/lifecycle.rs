//! Shared close-cause cell.
//!
//! The state stream, the event sink, and the result slot form a single
//! cancellation domain. This module holds the one cell they all delegate
//! to: whichever surface settles first decides the close cause everywhere.

use crate::error::WorkflowError;
use tokio::sync::watch;

/// How a workflow closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Close {
    /// The reactor returned `FinishWith`; every surface closes normally.
    Finished,
    /// Cancellation or failure; the cause is shared by every surface.
    Cause(WorkflowError),
}

impl Close {
    /// Returns the non-normal close cause, if any.
    pub fn cause(&self) -> Option<&WorkflowError> {
        match self {
            Close::Finished => None,
            Close::Cause(cause) => Some(cause),
        }
    }
}

/// First-settle-wins close cell, observable by any number of waiters.
pub(crate) struct Lifecycle {
    close: watch::Sender<Option<Close>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (close, _) = watch::channel(None);
        Self { close }
    }

    /// Records the close state. Only the first call takes effect; later
    /// calls are no-ops and return false.
    pub fn settle(&self, close: Close) -> bool {
        let recorded = close.clone();
        let first = self.close.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(close);
                true
            } else {
                false
            }
        });
        if first {
            match &recorded {
                Close::Finished => tracing::debug!("workflow finished"),
                Close::Cause(cause) => tracing::debug!(%cause, "workflow closed"),
            }
        }
        first
    }

    /// Settles with the fixed abandonment cause. Idempotent.
    pub fn abandon(&self) -> bool {
        self.settle(Close::Cause(WorkflowError::abandoned()))
    }

    /// Returns the recorded close state, or `None` while still running.
    pub fn close_state(&self) -> Option<Close> {
        self.close.borrow().clone()
    }

    /// Suspends until the workflow closes, then returns the close state.
    pub async fn closed(&self) -> Close {
        let mut rx = self.close.subscribe();
        loop {
            if let Some(close) = rx.borrow_and_update().clone() {
                return close;
            }
            if rx.changed().await.is_err() {
                // The sender lives as long as this Lifecycle, so this arm is
                // unreachable while `self` is borrowed.
                return Close::Finished;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_settle_wins() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.settle(Close::Cause(WorkflowError::abandoned())));
        assert!(!lifecycle.settle(Close::Finished));
        assert_eq!(
            lifecycle.close_state(),
            Some(Close::Cause(WorkflowError::abandoned()))
        );
    }

    #[test]
    fn test_abandon_idempotent() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.abandon());
        assert!(!lifecycle.abandon());
        assert_eq!(
            lifecycle.close_state(),
            Some(Close::Cause(WorkflowError::abandoned()))
        );
    }

    #[tokio::test]
    async fn test_closed_wakes_waiter() {
        use std::sync::Arc;

        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.closed().await })
        };
        lifecycle.settle(Close::Finished);
        assert_eq!(waiter.await.unwrap(), Close::Finished);
    }

    #[tokio::test]
    async fn test_closed_returns_immediately_when_settled() {
        let lifecycle = Lifecycle::new();
        lifecycle.settle(Close::Cause(WorkflowError::cancelled("stop")));
        assert_eq!(
            lifecycle.closed().await,
            Close::Cause(WorkflowError::cancelled("stop"))
        );
    }
}
