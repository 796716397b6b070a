//! The reactor loop.
//!
//! A [`Reactor`] is the user-supplied state-transition function. Launching
//! it spawns one background task that drives the loop: emit the current
//! state, invoke the reactor, repeat until it returns
//! [`Reaction::FinishWith`], fails, or the workflow is cancelled from the
//! outside. All invocations of one reactor are strictly sequential, so
//! reactor logic needs no internal locking.

use crate::error::WorkflowError;
use crate::lifecycle::{Close, Lifecycle};
use crate::reaction::Reaction;
use crate::select::{EventCore, EventReceiver};
use crate::state::{EventSender, WorkflowState};
use crate::stream::StateBroadcaster;
use crate::workflow::{ResultCell, Workflow};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// A state machine's transition function.
///
/// Given the current state and the event source, produce the next
/// [`Reaction`]. The implementation may suspend: waiting on a selection
/// point built from `events`, or awaiting any other async operation.
/// Returning an error is terminal for the workflow instance; the runtime
/// never retries a failed invocation.
#[async_trait]
pub trait Reactor<S, E, R>: Send {
    async fn on_react(
        &mut self,
        state: S,
        events: &EventReceiver<E>,
    ) -> Result<Reaction<S, R>, WorkflowError>;
}

impl<S, E, R> Workflow<S, E, R>
where
    S: Clone + Send + 'static,
    E: Send + Debug + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Launches `reactor` from `initial_state` on the ambient tokio
    /// runtime and returns the handle to it.
    pub fn launch(reactor: impl Reactor<S, E, R> + 'static, initial_state: S) -> Self {
        Self::launch_reaction(reactor, Reaction::EnterState(initial_state))
    }

    /// Launches `reactor` from an initial [`Reaction`]. Passing
    /// `FinishWith` starts the workflow already terminated.
    pub fn launch_reaction(
        reactor: impl Reactor<S, E, R> + 'static,
        initial: Reaction<S, R>,
    ) -> Self {
        let core = Arc::new(EventCore::new());
        let broadcaster = Arc::new(StateBroadcaster::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let result_cell = Arc::new(ResultCell::new());

        let workflow = Workflow {
            broadcaster: broadcaster.clone(),
            result_cell: result_cell.clone(),
            lifecycle: lifecycle.clone(),
        };
        tokio::spawn(run_reactor_loop(
            reactor,
            initial,
            core,
            broadcaster,
            lifecycle,
            result_cell,
        ));
        workflow
    }
}

async fn run_reactor_loop<S, E, R>(
    mut reactor: impl Reactor<S, E, R>,
    initial: Reaction<S, R>,
    core: Arc<EventCore<E>>,
    broadcaster: Arc<StateBroadcaster<S, E>>,
    lifecycle: Arc<Lifecycle>,
    result_cell: Arc<ResultCell<R>>,
) where
    S: Clone + Send + 'static,
    E: Send + Debug + 'static,
    R: Clone + Send + Sync + 'static,
{
    let events = EventReceiver::new(core.clone());
    let mut reaction = initial;
    let mut finished = None;

    let close = loop {
        match reaction {
            Reaction::EnterState(state) => {
                // Bind the send capability to this emission's generation;
                // senders from earlier snapshots become stale.
                let generation = core.advance_generation();
                let sender = EventSender::bound(core.clone(), generation);
                broadcaster.emit(WorkflowState::new(state.clone(), sender));

                let next = tokio::select! {
                    // A settled close always wins over a ready transition,
                    // so no state is emitted after cancellation.
                    biased;
                    close = lifecycle.closed() => break close,
                    next = reactor.on_react(state, &events) => next,
                };
                match next {
                    Ok(next) => reaction = next,
                    Err(cause) => break Close::Cause(cause),
                }
            }
            Reaction::FinishWith(result) => {
                finished = Some(result);
                break Close::Finished;
            }
        }
    };

    settle_and_close(close, finished, &core, &broadcaster, &lifecycle, &result_cell);
}

/// Settles the lifecycle and propagates the winning close to all three
/// surfaces. If an external cancellation settled first, its cause wins and
/// is the one propagated, keeping the shared-cause invariant.
pub(crate) fn settle_and_close<S, E, R>(
    close: Close,
    finished: Option<R>,
    core: &EventCore<E>,
    broadcaster: &StateBroadcaster<S, E>,
    lifecycle: &Lifecycle,
    result_cell: &ResultCell<R>,
) where
    S: Clone,
    E: Send + Debug + 'static,
    R: Clone + Send + Sync + 'static,
{
    lifecycle.settle(close);
    let winner = lifecycle.close_state().unwrap_or(Close::Finished);
    match &winner {
        Close::Finished => {
            if let Some(result) = finished {
                result_cell.settle(Ok(result));
            }
        }
        Close::Cause(cause) => {
            result_cell.settle(Err(cause.clone()));
        }
    }
    core.close(winner);
    broadcaster.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    /// Drives string states with string commands: `on:<state>` enters a
    /// new state, `finish:<result>` terminates, `fail:<reason>` errors.
    struct CommandReactor;

    #[async_trait]
    impl Reactor<String, String, String> for CommandReactor {
        async fn on_react(
            &mut self,
            _state: String,
            events: &EventReceiver<String>,
        ) -> Result<Reaction<String, String>, WorkflowError> {
            let command = events.receive().await?;
            match command.split_once(':') {
                Some(("on", state)) => Ok(Reaction::EnterState(state.to_string())),
                Some(("finish", result)) => Ok(Reaction::FinishWith(result.to_string())),
                Some(("fail", reason)) => Err(WorkflowError::reactor_failure(reason)),
                _ => Err(WorkflowError::reactor_failure(format!(
                    "unrecognized command: {command}"
                ))),
            }
        }
    }

    fn launch() -> Workflow<String, String, String> {
        Workflow::launch(CommandReactor, "initial".to_string())
    }

    #[tokio::test]
    async fn test_initial_state() {
        let workflow = launch();
        let mut states = workflow.states();
        assert_eq!(states.recv().await.unwrap().unwrap().state, "initial");
        assert!(!workflow.is_terminated());
        workflow.abandon();
    }

    #[tokio::test]
    async fn test_states_then_finish() {
        let workflow = launch();
        let mut states = workflow.states();

        let first = states.recv().await.unwrap().unwrap();
        assert_eq!(first.state, "initial");
        assert_ok!(first.send_event("on:next".to_string()));

        let second = states.recv().await.unwrap().unwrap();
        assert_eq!(second.state, "next");
        second.send_event("finish:alldone".to_string()).unwrap();

        // Normal end of stream, then the FinishWith value.
        assert!(states.recv().await.unwrap().is_none());
        assert_eq!(workflow.result().await.unwrap(), "alldone");
        assert!(workflow.is_terminated());
    }

    #[tokio::test]
    async fn test_reactor_failure_shares_one_cause() {
        let workflow = launch();
        let mut states = workflow.states();

        let first = states.recv().await.unwrap().unwrap();
        first.send_event("fail:boom".to_string()).unwrap();

        let stream_cause = states.recv().await.unwrap_err();
        let result_cause = workflow.result().await.unwrap_err();
        assert_eq!(stream_cause, WorkflowError::reactor_failure("boom"));
        assert_eq!(stream_cause, result_cause);
    }

    #[tokio::test]
    async fn test_abandon_is_idempotent() {
        let workflow = launch();
        let mut states = workflow.states();
        states.recv().await.unwrap().unwrap();

        workflow.abandon();
        workflow.abandon();

        assert_eq!(states.recv().await.unwrap_err(), WorkflowError::abandoned());
        assert_eq!(
            workflow.result().await.unwrap_err(),
            WorkflowError::abandoned()
        );

        // Still a no-op after the workflow is already closed.
        workflow.abandon();
        assert_eq!(
            workflow.result().await.unwrap_err(),
            WorkflowError::abandoned()
        );
    }

    #[tokio::test]
    async fn test_abandon_after_normal_finish_is_noop() {
        let workflow = launch();
        let mut states = workflow.states();
        let first = states.recv().await.unwrap().unwrap();
        first.send_event("finish:done".to_string()).unwrap();
        assert_eq!(workflow.result().await.unwrap(), "done");

        workflow.abandon();
        assert_eq!(workflow.result().await.unwrap(), "done");
        assert!(workflow.states().recv().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_launch_already_finished() {
        let workflow: Workflow<String, String, String> =
            Workflow::launch_reaction(CommandReactor, Reaction::FinishWith("early".to_string()));
        let mut states = workflow.states();
        assert!(states.recv().await.unwrap().is_none());
        assert_eq!(workflow.result().await.unwrap(), "early");
    }

    #[tokio::test]
    async fn test_stale_snapshot_send_is_rejected() {
        let workflow = launch();
        let mut states = workflow.states();

        let first = states.recv().await.unwrap().unwrap();
        first.send_event("on:next".to_string()).unwrap();
        states.recv().await.unwrap().unwrap();

        let err = first.send_event("on:elsewhere".to_string()).unwrap_err();
        assert!(matches!(err, WorkflowError::StaleStateSend { .. }));
        workflow.abandon();
    }

    #[tokio::test]
    async fn test_send_after_finish_is_rejected() {
        let workflow = launch();
        let mut states = workflow.states();

        let first = states.recv().await.unwrap().unwrap();
        first.send_event("finish:done".to_string()).unwrap();
        workflow.result().await.unwrap();

        let err = first.send_event("on:next".to_string()).unwrap_err();
        assert!(err.is_usage_error());
    }

    #[tokio::test]
    async fn test_cancelling_stream_fails_result_with_same_cause() {
        let workflow = launch();
        let mut states = workflow.states();
        states.recv().await.unwrap().unwrap();

        let cause = WorkflowError::cancelled("operator shutdown");
        states.cancel(cause.clone());

        assert_eq!(workflow.result().await.unwrap_err(), cause);
        assert_eq!(states.recv().await.unwrap_err(), cause);
    }

    #[tokio::test]
    async fn test_cancelling_handle_closes_stream_with_same_cause() {
        let workflow = launch();
        let mut states = workflow.states();
        states.recv().await.unwrap().unwrap();

        let cause = WorkflowError::cancelled("giving up");
        workflow.cancel(cause.clone());

        assert_eq!(states.recv().await.unwrap_err(), cause);
        assert_eq!(workflow.result().await.unwrap_err(), cause);
    }

    #[tokio::test]
    async fn test_no_state_emitted_after_cancellation_beats_ready_transition() {
        use tokio::sync::mpsc;

        /// Transitions as soon as the test releases it.
        struct GatedReactor {
            gate: mpsc::UnboundedReceiver<()>,
        }

        #[async_trait]
        impl Reactor<u32, String, String> for GatedReactor {
            async fn on_react(
                &mut self,
                state: u32,
                _events: &EventReceiver<String>,
            ) -> Result<Reaction<u32, String>, WorkflowError> {
                self.gate.recv().await;
                Ok(Reaction::EnterState(state + 1))
            }
        }

        let (gate_tx, gate_rx) = mpsc::unbounded_channel();
        let workflow = Workflow::launch(GatedReactor { gate: gate_rx }, 0);
        let mut states = workflow.states();
        assert_eq!(states.recv().await.unwrap().unwrap().state, 0);

        // Make the transition and the cancellation ready at the same time.
        gate_tx.send(()).unwrap();
        let cause = WorkflowError::cancelled("raced shutdown");
        workflow.cancel(cause.clone());

        assert_eq!(states.recv().await.unwrap_err(), cause);
    }

    #[tokio::test]
    async fn test_broadcast_to_independent_subscriptions() {
        let workflow = launch();
        let mut first_sub = workflow.states();

        let first = first_sub.recv().await.unwrap().unwrap();
        first.send_event("on:next".to_string()).unwrap();
        let second = first_sub.recv().await.unwrap().unwrap();
        second.send_event("finish:done".to_string()).unwrap();
        workflow.result().await.unwrap();

        // A subscription opened after the fact replays the whole history.
        let mut second_sub = workflow.states();
        let mut seen = Vec::new();
        while let Some(state) = second_sub.recv().await.unwrap() {
            seen.push(state.state);
        }
        assert_eq!(seen, vec!["initial".to_string(), "next".to_string()]);
    }
}
