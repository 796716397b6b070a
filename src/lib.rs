//! # reflow
//!
//! A reactive state-machine workflow runtime.
//!
//! A user-supplied [`Reactor`] runs as an independent tokio task. The
//! runtime emits each state it enters on a broadcastable state stream,
//! feeds externally-sent events back into the reactor through single-winner
//! selection points, and settles a single terminal result. The state
//! stream, the event sink, and the result form one cancellation domain:
//! closing any of them closes the others with the same cause.
//!
//! This crate provides:
//! - The [`Reactor`] trait and [`Workflow::launch`] reactor loop
//! - Race-free event selection ([`EventReceiver`], [`EventSelector`])
//! - Generation-scoped event sending ([`WorkflowState`], [`EventSender`])
//! - Composition operators (`map_state`, `flat_map_state`, `map_event`,
//!   `map_result`) that preserve ordering and cancellation semantics
//! - Producer-style construction ([`produce_workflow`])
//!
//! ```no_run
//! use reflow::{Reaction, Reactor, Workflow, WorkflowError, EventReceiver};
//! use async_trait::async_trait;
//!
//! struct Turnstile;
//!
//! #[async_trait]
//! impl Reactor<u32, String, u32> for Turnstile {
//!     async fn on_react(
//!         &mut self,
//!         entries: u32,
//!         events: &EventReceiver<String>,
//!     ) -> Result<Reaction<u32, u32>, WorkflowError> {
//!         events
//!             .select()
//!             .on_value("coin".to_string(), move || Reaction::EnterState(entries + 1))
//!             .on_value("close".to_string(), move || Reaction::FinishWith(entries))
//!             .wait()
//!             .await
//!     }
//! }
//!
//! # async fn run() -> Result<(), WorkflowError> {
//! let workflow = Workflow::launch(Turnstile, 0);
//! let mut states = workflow.states();
//! while let Some(snapshot) = states.recv().await? {
//!     snapshot.send_event("coin".to_string())?;
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
mod lifecycle;
pub mod ops;
pub mod produce;
pub mod reaction;
pub mod reactor;
pub mod select;
pub mod state;
pub mod stream;
pub mod workflow;

pub use error::{WorkflowError, ABANDONED_REASON};
pub use ops::states_from;
pub use produce::{finished_workflow, produce_workflow, ProducerScope};
pub use reaction::Reaction;
pub use reactor::Reactor;
pub use select::{EventReceiver, EventSelector};
pub use state::{EventSender, WorkflowState};
pub use stream::StateStream;
pub use workflow::Workflow;
