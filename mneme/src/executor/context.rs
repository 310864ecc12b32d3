//! Execution context management: the step dispatcher.
//!
//! This module owns the decision made for every intercepted call (replay
//! it from the log, execute it, wait for a signal, delay it, or abort the
//! attempt) together with the task-local plumbing that carries the
//! dispatcher and the ambient call mode across async boundaries.

use super::error::EngineError;
use super::rendezvous::Rendezvous;
use crate::core::{serialize_value, CallMode, InvocationStatus};
use crate::storage::{ExecutionLog, StartRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Method name logged for a synthetic flow-entry row, used when a flow
/// is driven by calling step methods directly instead of an annotated
/// flow method.
pub(crate) const ENTRY_METHOD: &str = "run()";

tokio::task_local! {
    /// Ambient call mode for the current logical task.
    pub static CALL_MODE: CallMode;
}

tokio::task_local! {
    /// Dispatcher bound to the flow invocation currently running on this
    /// logical task. Type-erased over the storage backend so the
    /// task-local has a concrete type.
    pub static EXECUTION_CONTEXT: Arc<ExecutionContext<Box<dyn ExecutionLog>>>;
}

/// What an intercepted method is, as declared by its annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// The flow entry; owns step 0 and resets numbering.
    Entry,
    /// An ordinary durable step.
    Step,
    /// A step that parks the flow until an external signal arrives.
    Await,
}

/// Identity and declared behavior of an intercepted call.
pub struct StepSpec<'a> {
    /// Stable flow type identifier.
    pub class_name: &'a str,
    /// Method signature string, e.g. `say(String,i32)`.
    pub method_name: &'a str,
    pub kind: StepKind,
    /// Declared minimum wait before the body runs.
    pub delay: Option<Duration>,
}

/// The dispatcher's verdict for one intercepted call.
///
/// Produced by [`ExecutionContext::prepare_step`]; the generated wrapper
/// acts on it with full knowledge of the concrete argument and return
/// types.
pub enum StepDisposition {
    /// The step already completed: return the stored value, do not
    /// execute the body, write nothing.
    Replay {
        /// Serialized return value; absent for void steps.
        value: Option<String>,
    },
    /// A start was logged (and any delay served): execute the body with
    /// the original arguments, then record completion.
    Execute { step: i32 },
    /// As `Execute`, but a signal payload replaces the original
    /// arguments.
    ExecuteWith { step: i32, payload: String },
}

/// Reason the flow future was interrupted out-of-band.
pub(crate) enum Interrupt {
    /// An await-step was reached in `Run` mode; the row stays
    /// `WaitingForSignal` until a resume.
    Paused { step: i32 },
    /// A fatal dispatch fault; the attempt aborts.
    Fatal(EngineError),
}

/// Per-flow dispatcher state: the flow id, the step counter, and the
/// interrupt channel back to the flow handle.
///
/// One context is bound to one [`FlowHandle`](super::FlowHandle) and
/// lives as long as the handle, so step numbering continues across
/// successive `run`/`resume` invocations on the same handle. It must not
/// be driven from two tasks at once.
pub struct ExecutionContext<S: ExecutionLog> {
    id: Uuid,
    storage: Arc<S>,
    rendezvous: Arc<Rendezvous>,
    flow_class: String,
    flow_parameters: String,
    step_counter: AtomicI32,
    interrupt: Mutex<Option<Interrupt>>,
    step_failed: AtomicBool,
    in_step_body: AtomicBool,
}

impl<S: ExecutionLog> ExecutionContext<S> {
    pub(crate) fn new(
        id: Uuid,
        storage: Arc<S>,
        rendezvous: Arc<Rendezvous>,
        flow_class: String,
        flow_parameters: String,
    ) -> Self {
        Self {
            id,
            storage,
            rendezvous,
            flow_class,
            flow_parameters,
            step_counter: AtomicI32::new(0),
            interrupt: Mutex::new(None),
            step_failed: AtomicBool::new(false),
            in_step_body: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The next step number this dispatcher will assign.
    pub fn current_step(&self) -> i32 {
        self.step_counter.load(Ordering::SeqCst)
    }

    /// Decides the fate of one intercepted call.
    ///
    /// Implements the dispatch algorithm: pick the anchor row (the
    /// latest row in `Resume` mode, the row at the claimed step number
    /// otherwise), verify the logged identity, replay completed rows,
    /// consume the rendezvous payload for resumed await-steps, log the
    /// start of a new attempt, serve any remaining delay, and park the
    /// flow when an await-step is reached in `Run` mode.
    ///
    /// Fatal faults (structural drift, storage failure) do not return:
    /// they divert through the interrupt channel and abort the attempt
    /// without touching the anchored row.
    pub async fn prepare_step(&self, spec: StepSpec<'_>, parameters: &str) -> StepDisposition {
        let mode = CALL_MODE.try_with(|m| *m).unwrap_or(CallMode::Run);

        let (step, anchor) = match mode {
            CallMode::Resume => {
                let latest = match self.storage.get_latest_invocation(self.id).await {
                    Ok(latest) => latest,
                    Err(e) => match self.diverge(e.into()).await {},
                };
                match latest {
                    Some(inv) => {
                        // Resume re-anchors on the latest row; numbering
                        // continues after it.
                        let step = inv.step();
                        self.step_counter.store(step + 1, Ordering::SeqCst);
                        (step, Some(inv))
                    }
                    None => (self.claim_step(spec.kind).await, None),
                }
            }
            _ => {
                let step = self.claim_step(spec.kind).await;
                match self.storage.get_invocation(self.id, step).await {
                    Ok(anchor) => (step, anchor),
                    Err(e) => match self.diverge(e.into()).await {},
                }
            }
        };

        let mut delay = spec.delay;

        if let Some(anchor) = &anchor {
            if anchor.class_name() != spec.class_name || anchor.method_name() != spec.method_name {
                match self
                    .diverge(EngineError::StructuralDrift {
                        step,
                        logged_class: anchor.class_name().to_string(),
                        logged_method: anchor.method_name().to_string(),
                        called_class: spec.class_name.to_string(),
                        called_method: spec.method_name.to_string(),
                    })
                    .await
                {}
            }

            match anchor.status() {
                InvocationStatus::Complete => {
                    debug!("Replaying step {} of flow {}", step, self.id);
                    return StepDisposition::Replay {
                        value: anchor.return_value().map(str::to_string),
                    };
                }
                InvocationStatus::WaitingForSignal
                    if mode == CallMode::Resume && spec.kind == StepKind::Await =>
                {
                    // Blocks only if no signal has been delivered yet.
                    let payload = self.rendezvous.recv(self.id).await;
                    self.log_start(&spec, step, parameters, InvocationStatus::Pending)
                        .await;
                    return StepDisposition::ExecuteWith { step, payload };
                }
                _ => {
                    // A new attempt on an unfinished row owes only the
                    // part of the declared delay not already served.
                    delay = remaining_delay(spec.delay, anchor.timestamp());
                }
            }
        }

        let status = if mode == CallMode::Await
            || (spec.kind == StepKind::Await && mode != CallMode::Resume)
        {
            InvocationStatus::WaitingForSignal
        } else {
            InvocationStatus::Pending
        };

        self.log_start(&spec, step, parameters, status).await;

        if let Some(delay) = delay {
            if !delay.is_zero() {
                debug!(
                    "Delaying step {} of flow {} for {:?}",
                    step, self.id, delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        if spec.kind == StepKind::Await {
            match mode {
                CallMode::Run => {
                    debug!(
                        "Flow {} pausing at step {} until signalled",
                        self.id, step
                    );
                    match self.park(step).await {}
                }
                CallMode::Await => {
                    let payload = self.rendezvous.recv(self.id).await;
                    return StepDisposition::ExecuteWith { step, payload };
                }
                CallMode::Resume => {}
            }
        }

        StepDisposition::Execute { step }
    }

    /// Records a step's completion, making the row terminal. Completing
    /// the flow entry also drops the flow's rendezvous slot.
    ///
    /// Does not return on failure: the user side effect may already have
    /// happened, so the attempt aborts and the step is retried on the
    /// next drive.
    pub async fn complete_step<R: Serialize>(&self, step: i32, value: &R) {
        let text = match serialize_value(value) {
            Ok(text) => text,
            Err(e) => match self.diverge(e.into()).await {},
        };

        if let Err(e) = self
            .storage
            .log_invocation_completion(self.id, step, &text)
            .await
        {
            match self.diverge(e.into()).await {}
        }

        if step == 0 {
            self.rendezvous.release(self.id);
        }
    }

    /// Aborts the current attempt with a fatal fault. Never returns; the
    /// flow handle surfaces the error to its caller.
    pub async fn abort(&self, error: EngineError) -> Infallible {
        self.diverge(error).await
    }

    /// Marks the current invocation as failed so the flow entry is not
    /// completed when the action returns.
    pub fn note_step_failure(&self) {
        self.step_failed.store(true, Ordering::SeqCst);
    }

    /// True while a step body is executing. Step calls made from inside
    /// another step's body bypass the dispatcher entirely and are not
    /// logged as separate steps.
    pub fn in_step_body(&self) -> bool {
        self.in_step_body.load(Ordering::SeqCst)
    }

    pub fn enter_step_body(&self) {
        self.in_step_body.store(true, Ordering::SeqCst);
    }

    pub fn exit_step_body(&self) {
        self.in_step_body.store(false, Ordering::SeqCst);
    }

    async fn diverge(&self, error: EngineError) -> Infallible {
        error!("Aborting attempt for flow {}: {}", self.id, error);
        self.set_interrupt(Interrupt::Fatal(error));
        std::future::pending().await
    }

    async fn park(&self, step: i32) -> Infallible {
        self.set_interrupt(Interrupt::Paused { step });
        std::future::pending().await
    }

    fn set_interrupt(&self, interrupt: Interrupt) {
        *self.interrupt.lock().expect("interrupt lock poisoned") = Some(interrupt);
    }

    pub(crate) fn take_interrupt(&self) -> Option<Interrupt> {
        self.interrupt.lock().expect("interrupt lock poisoned").take()
    }

    pub(crate) fn begin_invocation(&self) {
        self.take_interrupt();
        self.step_failed.store(false, Ordering::SeqCst);
        self.in_step_body.store(false, Ordering::SeqCst);
    }

    pub(crate) fn signal(&self, payload: String) {
        self.rendezvous.signal(self.id, payload);
    }

    /// Claims the next step number. The first intercepted call of a flow
    /// that has no annotated entry method creates the synthetic entry
    /// row and is numbered 1.
    async fn claim_step(&self, kind: StepKind) -> i32 {
        if kind == StepKind::Entry {
            self.step_counter.store(0, Ordering::SeqCst);
        }

        let step = self.step_counter.fetch_add(1, Ordering::SeqCst);
        if step == 0 && kind != StepKind::Entry {
            self.ensure_entry_row().await;
            return self.step_counter.fetch_add(1, Ordering::SeqCst);
        }

        step
    }

    /// Writes (or re-starts) the synthetic entry row for flows driven
    /// without an annotated flow method.
    async fn ensure_entry_row(&self) {
        let existing = match self.storage.get_invocation(self.id, 0).await {
            Ok(existing) => existing,
            Err(e) => match self.diverge(e.into()).await {},
        };

        if let Some(inv) = &existing {
            if inv.class_name() != self.flow_class || inv.method_name() != ENTRY_METHOD {
                match self
                    .diverge(EngineError::StructuralDrift {
                        step: 0,
                        logged_class: inv.class_name().to_string(),
                        logged_method: inv.method_name().to_string(),
                        called_class: self.flow_class.clone(),
                        called_method: ENTRY_METHOD.to_string(),
                    })
                    .await
                {}
            }
            if inv.status() == InvocationStatus::Complete {
                return;
            }
        }

        let record = StartRecord {
            id: self.id,
            step: 0,
            class_name: &self.flow_class,
            method_name: ENTRY_METHOD,
            delay: None,
            status: InvocationStatus::Pending,
            parameters: &self.flow_parameters,
        };
        if let Err(e) = self.storage.log_invocation_start(record).await {
            match self.diverge(e.into()).await {}
        }
    }

    async fn log_start(
        &self,
        spec: &StepSpec<'_>,
        step: i32,
        parameters: &str,
        status: InvocationStatus,
    ) {
        let record = StartRecord {
            id: self.id,
            step,
            class_name: spec.class_name,
            method_name: spec.method_name,
            delay: spec.delay,
            status,
            parameters,
        };
        if let Err(e) = self.storage.log_invocation_start(record).await {
            match self.diverge(e.into()).await {}
        }
    }

    /// Completes the synthetic entry row after a successful, un-paused
    /// `run`/`execute`, then drops the rendezvous slot.
    pub(crate) async fn finish_entry(&self) -> Result<(), EngineError> {
        if self.step_failed.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.storage.get_invocation(self.id, 0).await? {
            Some(inv) if inv.status() != InvocationStatus::Complete => {
                self.storage
                    .log_invocation_completion(self.id, 0, "null")
                    .await?;
                self.rendezvous.release(self.id);
            }
            Some(_) => self.rendezvous.release(self.id),
            None => {}
        }

        Ok(())
    }
}

/// The part of a declared delay not yet served, measured from the row's
/// first start. A stale row owes nothing.
fn remaining_delay(declared: Option<Duration>, first_start: DateTime<Utc>) -> Option<Duration> {
    let declared = declared?;
    let elapsed_ms = (Utc::now() - first_start).num_milliseconds().max(0) as u128;
    let declared_ms = declared.as_millis();
    if declared_ms > elapsed_ms {
        Some(Duration::from_millis((declared_ms - elapsed_ms) as u64))
    } else {
        None
    }
}

/// Adapts an `Arc<S>` storage handle to the boxed trait object the
/// task-local requires.
pub(crate) struct StorageWrapper<S: ExecutionLog>(pub(crate) Arc<S>);

#[async_trait::async_trait]
impl<S: ExecutionLog> ExecutionLog for StorageWrapper<S> {
    async fn log_invocation_start(
        &self,
        record: crate::storage::StartRecord<'_>,
    ) -> crate::storage::Result<()> {
        self.0.log_invocation_start(record).await
    }

    async fn log_invocation_completion(
        &self,
        id: Uuid,
        step: i32,
        return_value: &str,
    ) -> crate::storage::Result<crate::core::Invocation> {
        self.0
            .log_invocation_completion(id, step, return_value)
            .await
    }

    async fn get_invocation(
        &self,
        id: Uuid,
        step: i32,
    ) -> crate::storage::Result<Option<crate::core::Invocation>> {
        self.0.get_invocation(id, step).await
    }

    async fn get_latest_invocation(
        &self,
        id: Uuid,
    ) -> crate::storage::Result<Option<crate::core::Invocation>> {
        self.0.get_latest_invocation(id).await
    }

    async fn get_invocations_for_flow(
        &self,
        id: Uuid,
    ) -> crate::storage::Result<Vec<crate::core::Invocation>> {
        self.0.get_invocations_for_flow(id).await
    }

    async fn get_incomplete_flows(&self) -> crate::storage::Result<Vec<crate::core::Invocation>> {
        self.0.get_incomplete_flows().await
    }

    async fn reset(&self) -> crate::storage::Result<()> {
        self.0.reset().await
    }
}
