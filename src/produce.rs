//! Producer-style workflow construction.
//!
//! An alternative to [`Reactor`](crate::Reactor) for state machines that
//! read more naturally as one straight-line async block: the block emits
//! states, reads events, and finishes by returning the result. Lifecycle
//! linkage is identical to the reactor loop.

use crate::error::WorkflowError;
use crate::lifecycle::{Close, Lifecycle};
use crate::reactor::settle_and_close;
use crate::select::{EventCore, EventReceiver};
use crate::state::{EventSender, WorkflowState};
use crate::stream::StateBroadcaster;
use crate::workflow::{ResultCell, Workflow};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Capabilities handed to a producer block: emit states, read events.
pub struct ProducerScope<S, E> {
    core: Arc<EventCore<E>>,
    broadcaster: Arc<StateBroadcaster<S, E>>,
    events: EventReceiver<E>,
}

impl<S, E> ProducerScope<S, E>
where
    S: Clone + Send + 'static,
    E: Send + Debug + 'static,
{
    /// Emits a state snapshot paired with a fresh send capability. Senders
    /// from earlier emissions become stale.
    pub fn emit(&self, state: S) {
        let generation = self.core.advance_generation();
        let sender = EventSender::bound(self.core.clone(), generation);
        self.broadcaster.emit(WorkflowState::new(state, sender));
    }

    /// The event source for building selection points.
    pub fn events(&self) -> &EventReceiver<E> {
        &self.events
    }

    /// Suspends until any event arrives.
    pub async fn receive(&self) -> Result<E, WorkflowError> {
        self.events.receive().await
    }
}

/// Launches a workflow from an async producer block.
///
/// The block's `Ok` return value settles the result and closes the state
/// stream normally; an `Err` or an external cancellation closes every
/// surface with that shared cause.
pub fn produce_workflow<S, E, R, F, Fut>(block: F) -> Workflow<S, E, R>
where
    S: Clone + Send + 'static,
    E: Send + Debug + 'static,
    R: Clone + Send + Sync + 'static,
    F: FnOnce(ProducerScope<S, E>) -> Fut,
    Fut: Future<Output = Result<R, WorkflowError>> + Send + 'static,
{
    let core = Arc::new(EventCore::new());
    let broadcaster = Arc::new(StateBroadcaster::new());
    let lifecycle = Arc::new(Lifecycle::new());
    let result_cell = Arc::new(ResultCell::new());

    let workflow = Workflow {
        broadcaster: broadcaster.clone(),
        result_cell: result_cell.clone(),
        lifecycle: lifecycle.clone(),
    };

    let scope = ProducerScope {
        core: core.clone(),
        broadcaster: broadcaster.clone(),
        events: EventReceiver::new(core.clone()),
    };
    let fut = block(scope);
    tokio::spawn(async move {
        let (close, finished) = tokio::select! {
            biased;
            close = lifecycle.closed() => (close, None),
            outcome = fut => match outcome {
                Ok(result) => (Close::Finished, Some(result)),
                Err(cause) => (Close::Cause(cause), None),
            },
        };
        settle_and_close(close, finished, &core, &broadcaster, &lifecycle, &result_cell);
    });
    workflow
}

/// An already-terminated workflow: closed state stream, settled result.
pub fn finished_workflow<S, E, R>(result: R) -> Workflow<S, E, R>
where
    S: Clone + Send + 'static,
    E: Send + Debug + 'static,
    R: Clone + Send + Sync + 'static,
{
    let core = Arc::new(EventCore::new());
    let broadcaster = Arc::new(StateBroadcaster::new());
    let lifecycle = Arc::new(Lifecycle::new());
    let result_cell = Arc::new(ResultCell::new());

    settle_and_close(
        Close::Finished,
        Some(result),
        &core,
        &broadcaster,
        &lifecycle,
        &result_cell,
    );

    Workflow {
        broadcaster,
        result_cell,
        lifecycle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_producer_emits_receives_and_finishes() {
        let workflow: Workflow<&'static str, String, String> = produce_workflow(|scope| async move {
            scope.emit("greeting");
            let name = scope.receive().await?;
            scope.emit("farewell");
            Ok(format!("hello {name}"))
        });
        let mut states = workflow.states();

        let greeting = states.recv().await.unwrap().unwrap();
        assert_eq!(greeting.state, "greeting");
        greeting.send_event("ada".to_string()).unwrap();

        assert_eq!(states.recv().await.unwrap().unwrap().state, "farewell");
        assert!(states.recv().await.unwrap().is_none());
        assert_eq!(workflow.result().await.unwrap(), "hello ada");
    }

    #[tokio::test]
    async fn test_producer_error_closes_all_surfaces() {
        let workflow: Workflow<&'static str, String, String> = produce_workflow(|scope| async move {
            scope.emit("working");
            Err(WorkflowError::reactor_failure("gave up"))
        });
        let mut states = workflow.states();

        assert_eq!(states.recv().await.unwrap().unwrap().state, "working");
        assert_eq!(
            states.recv().await.unwrap_err(),
            WorkflowError::reactor_failure("gave up")
        );
        assert_eq!(
            workflow.result().await.unwrap_err(),
            WorkflowError::reactor_failure("gave up")
        );
    }

    #[tokio::test]
    async fn test_producer_abandon() {
        let workflow: Workflow<&'static str, String, String> = produce_workflow(|scope| async move {
            scope.emit("waiting");
            let event = scope.receive().await?;
            Ok(event)
        });
        let mut states = workflow.states();
        states.recv().await.unwrap().unwrap();

        workflow.abandon();
        assert_eq!(states.recv().await.unwrap_err(), WorkflowError::abandoned());
        assert_eq!(
            workflow.result().await.unwrap_err(),
            WorkflowError::abandoned()
        );
    }

    #[tokio::test]
    async fn test_producer_selection_points() {
        let workflow: Workflow<&'static str, u32, u32> = produce_workflow(|scope| async move {
            scope.emit("picking");
            let doubled = scope
                .events()
                .select::<u32>()
                .on_when(|n| *n % 2 == 0, |n| n * 2)
                .wait()
                .await?;
            Ok(doubled)
        });
        let mut states = workflow.states();

        let picking = states.recv().await.unwrap().unwrap();
        let err = picking.send_event(3).unwrap_err();
        assert!(matches!(err, WorkflowError::NoMatchingClause { .. }));

        picking.send_event(4).unwrap();
        assert_eq!(workflow.result().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_finished_workflow() {
        let workflow: Workflow<&'static str, String, u32> = finished_workflow(99);
        let mut states = workflow.states();
        assert!(states.recv().await.unwrap().is_none());
        assert_eq!(workflow.result().await.unwrap(), 99);
        assert!(workflow.is_terminated());
    }
}
