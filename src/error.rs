//! Workflow error types.

use thiserror::Error;

/// Reason recorded when a workflow is abandoned through [`abandon`].
///
/// [`abandon`]: crate::Workflow::abandon
pub const ABANDONED_REASON: &str = "Workflow abandoned.";

/// Reason reported to senders after the workflow finished normally.
pub(crate) const FINISHED_REASON: &str = "Workflow finished.";

/// Errors from the workflow runtime.
///
/// `Cancelled` and `ReactorFailure` are terminal for the workflow instance
/// and appear as the shared closing cause on the state stream, the event
/// sink, and the result. `NoMatchingClause` and `StaleStateSend` are usage
/// errors reported synchronously to the sender; they do not affect the
/// workflow's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// Orderly cancellation requested by a caller.
    #[error("workflow cancelled: {reason}")]
    Cancelled { reason: String },

    /// The user-supplied reactor failed.
    #[error("reactor failed: {reason}")]
    ReactorFailure { reason: String },

    /// An event was sent that the current selection point does not accept,
    /// or there was no selection point waiting for it.
    #[error("no matching clause for event: {event}")]
    NoMatchingClause { event: String },

    /// An event was sent through a state snapshot that has been superseded
    /// by a newer emission.
    #[error("stale state snapshot, rejected event: {event}")]
    StaleStateSend { event: String },
}

impl WorkflowError {
    /// Creates a `Cancelled` error with the given reason.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        WorkflowError::Cancelled {
            reason: reason.into(),
        }
    }

    /// The cancellation recorded by [`Workflow::abandon`](crate::Workflow::abandon).
    pub fn abandoned() -> Self {
        Self::cancelled(ABANDONED_REASON)
    }

    /// Creates a `ReactorFailure` from a reason string.
    pub fn reactor_failure(reason: impl Into<String>) -> Self {
        WorkflowError::ReactorFailure {
            reason: reason.into(),
        }
    }

    pub(crate) fn no_matching_clause(event: impl Into<String>) -> Self {
        WorkflowError::NoMatchingClause {
            event: event.into(),
        }
    }

    pub(crate) fn stale_state_send(event: impl Into<String>) -> Self {
        WorkflowError::StaleStateSend {
            event: event.into(),
        }
    }

    /// Returns whether this error is an orderly cancellation rather than a
    /// failure. Adapters typically translate cancellations into normal
    /// completion and everything else into errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WorkflowError::Cancelled { .. })
    }

    /// Returns whether this error is a synchronous usage error that leaves
    /// the workflow running.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::NoMatchingClause { .. } | WorkflowError::StaleStateSend { .. }
        )
    }
}
