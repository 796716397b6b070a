//! The workflow handle.

use crate::error::WorkflowError;
use crate::lifecycle::{Close, Lifecycle};
use crate::stream::{StateBroadcaster, StateStream};
use std::sync::Arc;
use tokio::sync::watch;

/// Single-assignment result slot, awaitable by any number of readers.
pub(crate) struct ResultCell<R> {
    cell: watch::Sender<Option<Result<R, WorkflowError>>>,
}

impl<R: Clone + Send + Sync + 'static> ResultCell<R> {
    pub fn new() -> Self {
        let (cell, _) = watch::channel(None);
        Self { cell }
    }

    /// Settles the result. Only the first call takes effect.
    pub fn settle(&self, result: Result<R, WorkflowError>) -> bool {
        self.cell.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(result);
                true
            } else {
                false
            }
        })
    }

    /// Suspends until the result is settled, then returns it.
    pub async fn wait(&self) -> Result<R, WorkflowError> {
        let mut rx = self.cell.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // Unreachable while a handle to this cell is alive.
                return Err(WorkflowError::cancelled("workflow dropped"));
            }
        }
    }
}

/// Handle to a running workflow: a broadcastable state stream, an
/// awaitable terminal result, and cancellation entry points.
///
/// Handles are cheap to clone; every clone shares the same underlying
/// instance. Dropping all handles does not stop the workflow — use
/// [`abandon`](Workflow::abandon) for that.
pub struct Workflow<S, E, R> {
    pub(crate) broadcaster: Arc<StateBroadcaster<S, E>>,
    pub(crate) result_cell: Arc<ResultCell<R>>,
    pub(crate) lifecycle: Arc<Lifecycle>,
}

impl<S, E, R> Clone for Workflow<S, E, R> {
    fn clone(&self) -> Self {
        Self {
            broadcaster: self.broadcaster.clone(),
            result_cell: self.result_cell.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<S, E, R> Workflow<S, E, R>
where
    S: Clone + Send + 'static,
    E: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Opens an independent subscription to the state stream. Every
    /// subscription replays all prior emissions and then observes new ones
    /// in emission order.
    pub fn states(&self) -> StateStream<S, E> {
        self.broadcaster.subscribe(self.lifecycle.clone())
    }

    /// Awaits the terminal result. Fails with the shared close cause if
    /// the workflow was cancelled or its reactor failed.
    pub async fn result(&self) -> Result<R, WorkflowError> {
        self.result_cell.wait().await
    }

    /// Abandons the workflow with the fixed cancellation reason. Idempotent:
    /// calling it after the workflow already finished is a no-op.
    pub fn abandon(&self) {
        self.lifecycle.abandon();
    }

    /// Cancels the workflow with an arbitrary cause. The same cause closes
    /// the state stream, the event sink, and the result.
    pub fn cancel(&self, cause: WorkflowError) {
        self.lifecycle.settle(Close::Cause(cause));
    }

    /// Returns whether the workflow has reached a terminal state.
    pub fn is_terminated(&self) -> bool {
        self.lifecycle.close_state().is_some()
    }
}
