//! Composition operators.
//!
//! Each operator builds a derived [`Workflow`] handle whose state stream is
//! a transformed view of the source's. Lifecycle, result, and cancellation
//! are shared with the source, so derived handles never swallow or remap an
//! upstream failure: the close cause passes through unchanged, and
//! `abandon` on a derived handle abandons the source.

use crate::state::WorkflowState;
use crate::stream::StateBroadcaster;
use crate::workflow::{ResultCell, Workflow};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

impl<S, E, R> Workflow<S, E, R>
where
    S: Clone + Send + 'static,
    E: Send + Debug + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Maps each emitted state value with `transform`.
    ///
    /// `transform` may suspend; successive emissions are transformed
    /// strictly in order by one forwarding task, so concurrent invocations
    /// can never reorder the stream.
    pub fn map_state<S2, F, Fut>(self, mut transform: F) -> Workflow<S2, E, R>
    where
        S2: Clone + Send + 'static,
        F: FnMut(S) -> Fut + Send + 'static,
        Fut: Future<Output = S2> + Send + 'static,
    {
        let broadcaster = Arc::new(StateBroadcaster::new());
        let derived = Workflow {
            broadcaster: broadcaster.clone(),
            result_cell: self.result_cell.clone(),
            lifecycle: self.lifecycle.clone(),
        };
        let mut source = self.states();
        tokio::spawn(async move {
            while let Ok(Some(state)) = source.recv().await {
                let (value, sender) = state.into_parts();
                let mapped = transform(value).await;
                broadcaster.emit(WorkflowState::new(mapped, sender));
            }
            // Normal close and failure alike: the shared lifecycle already
            // carries the cause, so only the fan-out needs closing.
            broadcaster.close();
        });
        derived
    }

    /// Expands each emitted state into a sub-stream of derived states.
    ///
    /// Sub-stream elements are forwarded in order, paired with the source
    /// snapshot's send capability. Supersession policy: if the source emits
    /// a new state while the current sub-stream is still pending, the
    /// in-flight sub-stream is cancelled (dropped). Elements the sub-stream
    /// has already produced are always forwarded first. The source closing,
    /// normally or with a cause, cancels the in-flight sub-stream the same
    /// way, so the close is never held up by a sub-stream that stays open.
    pub fn flat_map_state<S2, F, Fut>(self, mut expand: F) -> Workflow<S2, E, R>
    where
        S2: Clone + Send + 'static,
        F: FnMut(S) -> Fut + Send + 'static,
        Fut: Future<Output = mpsc::UnboundedReceiver<S2>> + Send + 'static,
    {
        let broadcaster = Arc::new(StateBroadcaster::new());
        let derived = Workflow {
            broadcaster: broadcaster.clone(),
            result_cell: self.result_cell.clone(),
            lifecycle: self.lifecycle.clone(),
        };
        let mut source = self.states();
        tokio::spawn(async move {
            let mut pending: Option<WorkflowState<S, E>> = None;
            loop {
                let state = match pending.take() {
                    Some(state) => state,
                    None => match source.recv().await {
                        Ok(Some(state)) => state,
                        Ok(None) | Err(_) => break,
                    },
                };
                let (value, sender) = state.into_parts();
                let mut sub = expand(value).await;
                let mut source_done = false;
                loop {
                    tokio::select! {
                        // Drain available sub-stream elements before even
                        // looking at the source.
                        biased;
                        item = sub.recv() => match item {
                            Some(value) => {
                                broadcaster.emit(WorkflowState::new(value, sender.clone()));
                            }
                            None => break,
                        },
                        next = source.recv() => match next {
                            Ok(Some(state)) => {
                                // Supersede: drop the in-flight sub-stream.
                                pending = Some(state);
                                break;
                            }
                            // Source closed. The in-flight sub-stream is
                            // dropped like a superseded one; its ready
                            // elements were drained by the biased arm, and
                            // waiting on it further would keep the close
                            // cause from ever surfacing downstream.
                            Ok(None) | Err(_) => {
                                source_done = true;
                                break;
                            }
                        },
                    }
                }
                if source_done {
                    break;
                }
            }
            broadcaster.close();
        });
        derived
    }

    /// Accepts events of type `E2`, translating each with `transform`
    /// before forwarding to this workflow's event sink.
    pub fn map_event<E2, F>(self, transform: F) -> Workflow<S, E2, R>
    where
        E2: Send + Debug + 'static,
        F: Fn(E2) -> E + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        let broadcaster = Arc::new(StateBroadcaster::new());
        let derived = Workflow {
            broadcaster: broadcaster.clone(),
            result_cell: self.result_cell.clone(),
            lifecycle: self.lifecycle.clone(),
        };
        let mut source = self.states();
        tokio::spawn(async move {
            while let Ok(Some(state)) = source.recv().await {
                let (value, sender) = state.into_parts();
                let transform = transform.clone();
                let sender = sender.map_input(move |event| transform(event));
                broadcaster.emit(WorkflowState::new(value, sender));
            }
            broadcaster.close();
        });
        derived
    }

    /// Maps the terminal result value. Failure and cancellation pass
    /// through untransformed.
    pub fn map_result<R2, F, Fut>(self, transform: F) -> Workflow<S, E, R2>
    where
        R2: Clone + Send + Sync + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = R2> + Send + 'static,
    {
        let result_cell = Arc::new(ResultCell::new());
        let derived = Workflow {
            broadcaster: self.broadcaster.clone(),
            result_cell: result_cell.clone(),
            lifecycle: self.lifecycle.clone(),
        };
        let source = self.result_cell.clone();
        tokio::spawn(async move {
            let settled = match source.wait().await {
                Ok(value) => Ok(transform(value).await),
                Err(cause) => Err(cause),
            };
            result_cell.settle(settled);
        });
        derived
    }
}

/// Builds a pre-filled sub-stream from an iterator, for use with
/// [`Workflow::flat_map_state`].
pub fn states_from<S2>(values: impl IntoIterator<Item = S2>) -> mpsc::UnboundedReceiver<S2> {
    let (tx, rx) = mpsc::unbounded_channel();
    for value in values {
        let _ = tx.send(value);
    }
    rx
}
