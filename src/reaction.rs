//! The two-variant outcome of one reactor invocation.

/// Command value returned by a reactor: either move the state machine into
/// a new state, or terminate it with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction<S, R> {
    /// Continue running in the given state.
    EnterState(S),
    /// Terminate the workflow with the given result.
    FinishWith(R),
}

impl<S, R> Reaction<S, R> {
    /// Returns whether this reaction terminates the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Reaction::FinishWith(_))
    }
}
