//! Caller-facing flow handle.
//!
//! A handle binds one flow value to one flow id and the dispatcher
//! context the generated step wrappers talk to. All user entry points
//! (`run`, `execute`, their detached variants, `resume`, and `signal`)
//! live here.

use super::context::{ExecutionContext, Interrupt, CALL_MODE, EXECUTION_CONTEXT};
use super::error::{EngineError, FlowOutcome, Result};
use crate::core::{serialize_value, CallMode};
use crate::storage::ExecutionLog;
use serde::Serialize;
use std::future::{poll_fn, Future};
use std::pin::pin;
use std::sync::Arc;
use std::task::Poll;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// How one drive of the flow future ended, before outcome mapping.
enum Drive<R> {
    Finished(R),
    Paused,
    Fatal(EngineError),
}

/// Per-flow façade: drives user actions against the dispatcher bound to
/// this flow id.
///
/// The handle owns no mutable flow state beyond that dispatcher; cloning
/// it shares the same step numbering, so a single flow must not be
/// driven from two tasks at once.
pub struct FlowHandle<T> {
    id: Uuid,
    flow: Arc<T>,
    ctx: Arc<ExecutionContext<Box<dyn ExecutionLog>>>,
}

impl<T> Clone for FlowHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            flow: Arc::clone(&self.flow),
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<T> FlowHandle<T> {
    pub(crate) fn new(
        id: Uuid,
        flow: Arc<T>,
        ctx: Arc<ExecutionContext<Box<dyn ExecutionLog>>>,
    ) -> Self {
        Self { id, flow, ctx }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the flow value this handle drives.
    pub fn flow(&self) -> &Arc<T> {
        &self.flow
    }

    /// Drives an action in `Run` mode.
    ///
    /// An await-step reached during the action parks the flow and is
    /// reported as [`FlowOutcome::Paused`], an expected outcome rather than an
    /// error. When the action finishes without pausing, the flow entry
    /// row is completed and the rendezvous slot dropped.
    pub async fn run<F, Fut, R>(&self, action: F) -> Result<FlowOutcome<R>>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        match self.drive(CallMode::Run, action).await {
            Drive::Finished(value) => {
                self.ctx.finish_entry().await?;
                Ok(FlowOutcome::Completed(value))
            }
            Drive::Paused => Ok(FlowOutcome::Paused),
            Drive::Fatal(e) => Err(e),
        }
    }

    /// Drives an action in `Run` mode and returns its value.
    ///
    /// Unlike [`run`](Self::run), a pause is not caught: a top-level
    /// flow that returns a value is not expected to await mid-flight, so
    /// it surfaces as [`EngineError::Paused`].
    pub async fn execute<F, Fut, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        match self.drive(CallMode::Run, action).await {
            Drive::Finished(value) => {
                self.ctx.finish_entry().await?;
                Ok(value)
            }
            Drive::Paused => Err(EngineError::Paused),
            Drive::Fatal(e) => Err(e),
        }
    }

    /// Drives an action in `Resume` mode after a signal has been (or is
    /// about to be) delivered.
    ///
    /// The dispatcher anchors on the flow's latest logged row; a waiting
    /// await-step consumes the rendezvous payload in place of its
    /// original arguments. Resuming never completes the flow entry; a
    /// subsequent `run` does.
    pub async fn resume<F, Fut, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        match self.drive(CallMode::Resume, action).await {
            Drive::Finished(value) => Ok(value),
            Drive::Paused => Err(EngineError::Paused),
            Drive::Fatal(e) => Err(e),
        }
    }

    /// Delivers a resume payload to this flow's rendezvous slot.
    ///
    /// The payload is the awaiting step's argument list: a tuple
    /// matching its parameters, e.g. `handle.signal(&(approved_at,))`.
    /// Does not itself resume execution; pair it with
    /// [`resume`](Self::resume). Signalling is idempotent: repeated
    /// deliveries before consumption keep the most recent payload and a
    /// single permit.
    pub fn signal<P: Serialize + ?Sized>(&self, payload: &P) -> Result<()> {
        let text = serialize_value(payload)?;
        self.ctx.signal(text);
        Ok(())
    }

    async fn drive<F, Fut, R>(&self, mode: CallMode, action: F) -> Drive<R>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        self.ctx.begin_invocation();

        let flow_future = EXECUTION_CONTEXT.scope(
            Arc::clone(&self.ctx),
            CALL_MODE.scope(mode, action(Arc::clone(&self.flow))),
        );
        let mut flow_future = pin!(flow_future);

        // Poll by hand: a parked or aborted dispatch pends forever after
        // recording its interrupt, which this loop converts into an
        // immediate outcome.
        poll_fn(|cx| match flow_future.as_mut().poll(cx) {
            Poll::Ready(value) => Poll::Ready(Drive::Finished(value)),
            Poll::Pending => match self.ctx.take_interrupt() {
                Some(Interrupt::Paused { step }) => {
                    debug!("Flow {} paused at step {}", self.id, step);
                    Poll::Ready(Drive::Paused)
                }
                Some(Interrupt::Fatal(e)) => Poll::Ready(Drive::Fatal(e)),
                None => Poll::Pending,
            },
        })
        .await
    }
}

impl<T: Send + Sync + 'static> FlowHandle<T> {
    /// As [`run`](Self::run), on a background task.
    pub fn run_detached<F, Fut, R>(&self, action: F) -> JoinHandle<Result<FlowOutcome<R>>>
    where
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move { handle.run(action).await })
    }

    /// As [`execute`](Self::execute), on a background task.
    pub fn execute_detached<F, Fut, R>(&self, action: F) -> JoinHandle<Result<R>>
    where
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move { handle.execute(action).await })
    }
}
