//! State snapshots and their event-sending capability.

use crate::error::WorkflowError;
use crate::select::EventCore;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// Write capability into a workflow's event sink, scoped to the state
/// generation it was emitted with.
///
/// The strict staleness policy applies uniformly: sending through a sender
/// whose generation has been superseded fails with
/// [`WorkflowError::StaleStateSend`] instead of being silently ignored.
pub struct EventSender<E> {
    send: Arc<dyn Fn(E) -> Result<(), WorkflowError> + Send + Sync>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            send: Arc::clone(&self.send),
        }
    }
}

impl<E> EventSender<E> {
    /// Sends an event into the workflow.
    pub fn send(&self, event: E) -> Result<(), WorkflowError> {
        (self.send)(event)
    }

    /// Adapts this sender to accept a different event type, translating
    /// each event with `transform` before forwarding.
    pub fn map_input<E2>(
        self,
        transform: impl Fn(E2) -> E + Send + Sync + 'static,
    ) -> EventSender<E2>
    where
        E: 'static,
    {
        let inner = self.send;
        EventSender {
            send: Arc::new(move |event| inner(transform(event))),
        }
    }
}

impl<E: Send + Debug + 'static> EventSender<E> {
    /// A sender bound to `generation` of the given sink. The staleness
    /// check runs inside the sink, atomically with delivery.
    pub(crate) fn bound(core: Arc<EventCore<E>>, generation: u64) -> Self {
        Self {
            send: Arc::new(move |event| core.send_from(event, generation)),
        }
    }
}

/// A state snapshot paired with the send capability for that snapshot's
/// generation.
pub struct WorkflowState<S, E> {
    /// The emitted state value.
    pub state: S,
    sender: EventSender<E>,
}

impl<S, E> WorkflowState<S, E> {
    pub(crate) fn new(state: S, sender: EventSender<E>) -> Self {
        Self { state, sender }
    }

    /// Sends an event back into the workflow through this snapshot.
    pub fn send_event(&self, event: E) -> Result<(), WorkflowError> {
        self.sender.send(event)
    }

    /// The send capability, detached from the state value.
    pub fn sender(&self) -> &EventSender<E> {
        &self.sender
    }

    pub fn into_parts(self) -> (S, EventSender<E>) {
        (self.state, self.sender)
    }
}

impl<S: Clone, E> Clone for WorkflowState<S, E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<S: fmt::Debug, E> fmt::Debug for WorkflowState<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowState")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
