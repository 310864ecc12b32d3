//! Execution layer for the mneme durable execution engine.
//!
//! # Module Organization
//!
//! Each submodule hides one design decision:
//!
//! - [`context`]: how dispatch decisions are made and how the dispatcher
//!   travels across async boundaries
//! - [`rendezvous`]: how signals rendezvous with waiting flows
//! - [`handle`]: how user actions are driven and pauses surfaced
//! - [`engine`]: how engine state is held and flows are bound
//! - [`recovery`]: how incomplete flows are re-issued at startup
//! - [`error`]: engine error types and the flow outcome

mod context;
mod engine;
mod error;
mod handle;
mod recovery;
mod rendezvous;

pub use context::{
    ExecutionContext, StepDisposition, StepKind, StepSpec, CALL_MODE, EXECUTION_CONTEXT,
};
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, FlowOutcome, Result};
pub use handle::FlowHandle;
pub use rendezvous::Rendezvous;

use crate::core::CallMode;
use std::future::Future;
use uuid::Uuid;

/// Waits in-process for this flow's signal instead of pausing.
///
/// Wrap an await-step call to block the current task on the rendezvous
/// slot: the step is logged as `WaitingForSignal`, the task waits for
/// [`FlowHandle::signal`], and the step body then runs with the
/// signalled payload in place of its arguments.
///
/// ```ignore
/// let confirmed_at = await_external_signal(self.clone().confirm_email(fallback)).await;
/// ```
///
/// Without this wrapper an await-step reached in `Run` mode parks the
/// flow and `run` returns [`FlowOutcome::Paused`].
pub async fn await_external_signal<F: Future>(step: F) -> F::Output {
    CALL_MODE.scope(CallMode::Await, step).await
}

/// Returns a deterministic idempotency key for the current step.
///
/// The key format is `{flow_id}-{step}`: unique per step execution,
/// stable across retries and replays. Hand it to external services that
/// deduplicate on request keys so a retried step cannot repeat its side
/// effect.
///
/// # Panics
///
/// Panics if called outside of a flow execution context (i.e. not within
/// an annotated flow or step method).
pub fn idempotency_key() -> String {
    let (flow_id, step) = idempotency_key_parts();
    format!("{}-{}", flow_id, step)
}

/// Returns the components of the idempotency key: `(flow_id, step)`.
///
/// Useful when an external service dictates its own key format.
///
/// # Panics
///
/// Panics if called outside of a flow execution context.
pub fn idempotency_key_parts() -> (Uuid, i32) {
    EXECUTION_CONTEXT
        .try_with(|ctx| {
            // The counter holds the next step to assign; the step whose
            // body is running is the one before it.
            let step = ctx.current_step().saturating_sub(1);
            (ctx.id(), step)
        })
        .expect(
            "idempotency_key_parts() called outside of flow execution context. \
             It must be called from within an annotated flow or step method.",
        )
}
