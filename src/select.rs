//! Single-winner event selection.
//!
//! A reactor waits for events by installing a *selection point*: a set of
//! predicate clauses guarding one suspension. [`EventCore::send`] resolves
//! the point against an incoming event with exactly-one-winner semantics:
//! concurrent senders racing for the same point are serialized, the first
//! whose event matches a clause claims the point, and every other send
//! fails with `NoMatchingClause` even if its own event would have matched.

use crate::error::{WorkflowError, FINISHED_REASON};
use crate::lifecycle::Close;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

type Matcher<E, T> = Box<dyn FnMut(E) -> Result<T, E> + Send>;
type Deliver<E> = Box<dyn FnMut(E) -> Delivery + Send>;

/// Outcome of offering an event to an installed selection point.
enum Delivery {
    /// A clause matched and the waiter was resumed.
    Delivered,
    /// No clause matched; the point stays installed.
    NoMatch(String),
    /// A clause matched but the waiter is gone (selection dropped).
    Dead(String),
}

enum Slot<E> {
    /// No selection point installed (the reactor is busy).
    Idle,
    Waiting(Deliver<E>),
    Closed(Close),
}

/// Shared write side of the event sink. One per workflow instance.
pub(crate) struct EventCore<E> {
    slot: Mutex<Slot<E>>,

    /// Bumped before each state emission; senders bound to an older value
    /// are stale.
    generation: AtomicU64,
}

impl<E: Send + Debug + 'static> EventCore<E> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Marks the start of a new state generation and returns it.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Offers an event to the current selection point.
    ///
    /// The slot mutex is the single-winner claim: the first send that finds
    /// a matching clause resets the slot to `Idle`, so every send that
    /// lost the race observes an idle slot and fails.
    pub fn send(&self, event: E) -> Result<(), WorkflowError> {
        let mut slot = self.slot.lock();
        Self::deliver(&mut slot, event)
    }

    /// Offers an event on behalf of a sender bound to `generation`.
    ///
    /// The staleness check happens under the slot lock: a new selection
    /// point is only installed after the generation advances and behind
    /// this same lock, so a sender that passes the check here cannot
    /// deliver into a later generation's point.
    pub fn send_from(&self, event: E, generation: u64) -> Result<(), WorkflowError> {
        let mut slot = self.slot.lock();
        let current = self.generation();
        if current != generation {
            tracing::debug!(generation, current, "rejected event for superseded state");
            return Err(WorkflowError::stale_state_send(format!("{event:?}")));
        }
        Self::deliver(&mut slot, event)
    }

    fn deliver(slot: &mut Slot<E>, event: E) -> Result<(), WorkflowError> {
        match slot {
            Slot::Idle | Slot::Closed(_) => {
                let rendered = format!("{event:?}");
                tracing::warn!(event = %rendered, "rejected event: no selection point waiting");
                Err(WorkflowError::no_matching_clause(rendered))
            }
            Slot::Waiting(deliver) => match deliver(event) {
                Delivery::Delivered => {
                    *slot = Slot::Idle;
                    Ok(())
                }
                Delivery::NoMatch(rendered) => {
                    tracing::warn!(event = %rendered, "rejected event: no clause matched");
                    Err(WorkflowError::no_matching_clause(rendered))
                }
                Delivery::Dead(rendered) => {
                    *slot = Slot::Idle;
                    Err(WorkflowError::no_matching_clause(rendered))
                }
            },
        }
    }

    /// Closes the sink. A pending selection point is dropped, which resumes
    /// its waiter with the close cause; subsequent sends fail.
    pub fn close(&self, close: Close) {
        let mut slot = self.slot.lock();
        *slot = Slot::Closed(close);
    }
}

/// Read side of the event sink, held by the reactor.
pub struct EventReceiver<E> {
    core: Arc<EventCore<E>>,
}

impl<E: Send + Debug + 'static> EventReceiver<E> {
    pub(crate) fn new(core: Arc<EventCore<E>>) -> Self {
        Self { core }
    }

    /// Starts building a selection point resolving to a value of type `T`.
    pub fn select<T: Send + 'static>(&self) -> EventSelector<'_, E, T> {
        EventSelector {
            core: &self.core,
            clauses: Vec::new(),
        }
    }

    /// Suspends until any event arrives, then returns it. Equivalent to a
    /// selection point with a single catch-all clause.
    pub async fn receive(&self) -> Result<E, WorkflowError> {
        self.select().on_match(Ok).wait().await
    }
}

/// Builder for one selection point.
///
/// Clauses are tried in registration order against each incoming event.
/// Ties between *concurrent senders* are broken by first successful claim,
/// not by clause order.
pub struct EventSelector<'a, E, T> {
    core: &'a Arc<EventCore<E>>,
    clauses: Vec<Matcher<E, T>>,
}

impl<'a, E: Send + Debug + 'static, T: Send + 'static> EventSelector<'a, E, T> {
    /// Exact-value clause: matches events equal to `expected`.
    pub fn on_value(self, expected: E, mut then: impl FnMut() -> T + Send + 'static) -> Self
    where
        E: PartialEq,
    {
        self.on_match(move |event| {
            if event == expected {
                Ok(then())
            } else {
                Err(event)
            }
        })
    }

    /// Membership clause: `predicate` guards (typically a `matches!` over
    /// an enum), `then` consumes the full event.
    pub fn on_when(
        self,
        predicate: impl Fn(&E) -> bool + Send + 'static,
        mut then: impl FnMut(E) -> T + Send + 'static,
    ) -> Self {
        self.on_match(move |event| {
            if predicate(&event) {
                Ok(then(event))
            } else {
                Err(event)
            }
        })
    }

    /// Narrowing clause: return `Ok` with the selection value, or hand the
    /// event back with `Err` so later clauses can try it.
    pub fn on_match(mut self, matcher: impl FnMut(E) -> Result<T, E> + Send + 'static) -> Self {
        self.clauses.push(Box::new(matcher));
        self
    }

    /// Installs the selection point and suspends until one clause wins or
    /// the sink closes. The clause registry is torn down as soon as the
    /// point resolves, so no stale clause can match a later event.
    pub async fn wait(self) -> Result<T, WorkflowError> {
        let EventSelector { core, clauses } = self;
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = core.slot.lock();
            if let Slot::Closed(close) = &*slot {
                return Err(close_error(close));
            }
            // Reactor invocations are strictly sequential, so there is
            // never a second live selection point to displace.
            debug_assert!(
                !matches!(&*slot, Slot::Waiting(_)),
                "selection point installed while another is pending"
            );
            let mut clauses = clauses;
            let mut tx = Some(tx);
            *slot = Slot::Waiting(Box::new(move |event: E| {
                let rendered = format!("{event:?}");
                let mut event = event;
                for matcher in clauses.iter_mut() {
                    match matcher(event) {
                        Ok(value) => {
                            return match tx.take() {
                                Some(tx) => {
                                    if tx.send(value).is_ok() {
                                        Delivery::Delivered
                                    } else {
                                        Delivery::Dead(rendered)
                                    }
                                }
                                None => Delivery::Dead(rendered),
                            };
                        }
                        Err(unmatched) => event = unmatched,
                    }
                }
                Delivery::NoMatch(rendered)
            }));
        }

        // If this future is dropped mid-wait, the point must be removed so
        // a matching send cannot claim a dead selection.
        let guard = ClearOnDrop { core };
        match rx.await {
            Ok(value) => {
                drop(guard);
                Ok(value)
            }
            Err(_) => {
                drop(guard);
                let cause = match &*core.slot.lock() {
                    Slot::Closed(close) => close_error(close),
                    _ => WorkflowError::cancelled("selection dropped"),
                };
                Err(cause)
            }
        }
    }
}

struct ClearOnDrop<'a, E> {
    core: &'a Arc<EventCore<E>>,
}

impl<E> Drop for ClearOnDrop<'_, E> {
    fn drop(&mut self) {
        let mut slot = self.core.slot.lock();
        if matches!(&*slot, Slot::Waiting(_)) {
            *slot = Slot::Idle;
        }
    }
}

fn close_error(close: &Close) -> WorkflowError {
    match close {
        Close::Finished => WorkflowError::cancelled(FINISHED_REASON),
        Close::Cause(cause) => cause.clone(),
    }
}
