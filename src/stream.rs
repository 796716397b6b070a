//! State fan-out and subscriber streams.
//!
//! Emissions are broadcast, not competed for: every subscription observes
//! every emission in order. A subscription opened late replays the full
//! history first, so no subscriber can miss a state. Buffering is unbounded
//! and never drops; a non-normal close surfaces only after buffered states
//! have been drained.

use crate::error::WorkflowError;
use crate::lifecycle::{Close, Lifecycle};
use crate::state::WorkflowState;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

struct BroadcastInner<S, E> {
    history: Vec<WorkflowState<S, E>>,
    subscribers: Vec<mpsc::UnboundedSender<WorkflowState<S, E>>>,
    closed: bool,
}

/// Write side of the state stream, owned by the engine's background task.
pub(crate) struct StateBroadcaster<S, E> {
    inner: Mutex<BroadcastInner<S, E>>,
}

impl<S: Clone, E> StateBroadcaster<S, E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BroadcastInner {
                history: Vec::new(),
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Delivers a state to every live subscriber and records it for replay.
    pub fn emit(&self, state: WorkflowState<S, E>) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner
            .subscribers
            .retain(|tx| tx.send(state.clone()).is_ok());
        inner.history.push(state);
    }

    /// Closes the stream. Subscribers drain their buffers, then observe the
    /// close recorded in the lifecycle they were subscribed with.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// Opens a new subscription, replaying all prior emissions.
    pub fn subscribe(&self, lifecycle: Arc<Lifecycle>) -> StateStream<S, E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for state in &inner.history {
            let _ = tx.send(state.clone());
        }
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        StateStream { rx, lifecycle }
    }
}

/// One independent subscription to a workflow's state stream.
pub struct StateStream<S, E> {
    rx: mpsc::UnboundedReceiver<WorkflowState<S, E>>,
    lifecycle: Arc<Lifecycle>,
}

impl<S, E> StateStream<S, E> {
    /// Receives the next state snapshot.
    ///
    /// Returns `Ok(None)` when the workflow finished normally, or the
    /// shared close cause when it was cancelled or failed. Buffered states
    /// are always delivered before the close is reported.
    pub async fn recv(&mut self) -> Result<Option<WorkflowState<S, E>>, WorkflowError> {
        match self.rx.recv().await {
            Some(state) => Ok(Some(state)),
            None => match self.lifecycle.close_state() {
                Some(Close::Cause(cause)) => Err(cause),
                _ => Ok(None),
            },
        }
    }

    /// Cancels the whole workflow with `cause`. The same cause settles the
    /// result and closes the event sink.
    pub fn cancel(&self, cause: WorkflowError) {
        self.lifecycle.settle(Close::Cause(cause));
    }
}
