use crate::core::CoreError;
use crate::storage::StorageError;
use thiserror::Error;

/// Engine-level error type for flow dispatch and recovery.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A storage operation failed; the current attempt aborts and a
    /// later re-drive is safe.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding or decoding of parameters or return values failed.
    #[error("codec error: {0}")]
    Codec(#[from] CoreError),

    /// The logged identity for a step disagrees with the live call. The
    /// flow structure changed incompatibly mid-flight; the row is left
    /// untouched and nothing executes.
    #[error(
        "structural drift at step {step}: log has {logged_class}.{logged_method}, \
         call is {called_class}.{called_method}"
    )]
    StructuralDrift {
        step: i32,
        logged_class: String,
        logged_method: String,
        called_class: String,
        called_method: String,
    },

    /// No flow implementation is registered for the logged type id, so
    /// the flow cannot be rebuilt.
    #[error("no flow implementation registered for `{0}`")]
    NotRegistered(String),

    /// The flow reached an await-step and is parked until a signal
    /// arrives. `run` reports this as [`FlowOutcome::Paused`] instead.
    #[error("flow paused waiting for an external signal")]
    Paused,
}

/// How a driven flow invocation ended.
///
/// Pausing at an await-step is an expected control-flow outcome for
/// signal-gated flows, so it is part of the return type rather than an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome<R> {
    /// The action ran to the end and produced a value.
    Completed(R),
    /// An await-step parked the flow; re-drive it with `resume` after a
    /// signal arrives.
    Paused,
}

impl<R> FlowOutcome<R> {
    /// Returns the completed value, if the flow did not pause.
    pub fn completed(self) -> Option<R> {
        match self {
            FlowOutcome::Completed(value) => Some(value),
            FlowOutcome::Paused => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, FlowOutcome::Paused)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
