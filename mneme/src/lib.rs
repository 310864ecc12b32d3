//! Mneme: durable execution for Rust
//!
//! `mneme` (μνήμη, Greek for "memory") persists the progress of
//! long-running, multi-step workflows so they survive crashes, restarts,
//! and arbitrarily long pauses. A flow is ordinary straight-line async
//! code calling annotated step methods; the engine intercepts each step,
//! records its start and result in a durable log, and on a re-drive
//! replays completed steps from the log instead of executing them again.
//!
//! # Features
//!
//! - **Durable replay**: every step's arguments and result are logged;
//!   re-driving a flow executes only the work that never finished
//! - **Scheduled delays**: a step can declare a minimum wait between its
//!   first start and its body running; retries only serve the remainder
//! - **Signal rendezvous**: await-steps park the flow until an external
//!   signal delivers the arguments to continue with
//! - **Startup recovery**: incomplete flows are rebuilt from the log and
//!   re-issued automatically
//!
//! # Quick Start
//!
//! ```ignore
//! use mneme::prelude::*;
//!
//! #[derive(Clone, Serialize, Deserialize, FlowType)]
//! struct HelloFlow {
//!     greeting: String,
//! }
//!
//! impl HelloFlow {
//!     #[step]
//!     async fn say(self: Arc<Self>, name: String, i: i32) -> i32 {
//!         println!("{}, {} #{}", self.greeting, name, i);
//!         i
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(SqliteExecutionLog::new("flows.db")?);
//!     let engine = Engine::new(storage);
//!
//!     let flow = HelloFlow { greeting: "Hello".into() };
//!     let handle = engine.flow(flow, Uuid::new_v4())?;
//!
//!     handle
//!         .run(|f| async move {
//!             for i in 0..5 {
//!                 f.clone().say("World".into(), i).await;
//!             }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Re-running the same flow id replays the finished calls from the log;
//! each `say` body runs exactly once per step across any number of
//! drives.
//!
//! # Module Organization
//!
//! - [`core`]: foundation types (hides the log codec)
//! - [`storage`]: persistence layer (hides the database and schema)
//! - [`executor`]: dispatch engine (hides the replay strategy)

// Allow the proc-macros to reference ::mneme from within this crate.
extern crate self as mneme;

pub mod core;
pub mod executor;
pub mod storage;

pub use crate::core::{
    deserialize_value, serialize_value, CallMode, CoreError, FlowType, Invocation,
    InvocationStatus, Result as CoreResult,
};

pub use crate::executor::{
    await_external_signal, idempotency_key, idempotency_key_parts, Engine, EngineConfig,
    EngineError, ExecutionContext, FlowHandle, FlowOutcome, Rendezvous,
    Result as EngineResult, StepDisposition, StepKind, StepSpec, CALL_MODE, EXECUTION_CONTEXT,
};

pub use crate::storage::{
    ExecutionLog, InMemoryExecutionLog, Result as StorageResult, StartRecord, StorageError,
};

#[cfg(feature = "sqlite")]
pub use crate::storage::{PoolConfig, SqliteExecutionLog};

// Re-export the proc-macros.
pub use mneme_macros::{await_step, flow, step, FlowType};

// Re-export dependencies used in the public API so downstream crates
// cannot drift onto mismatched versions.
pub use serde;
pub use tokio;
pub use uuid;

/// Prelude module for convenient glob imports.
///
/// ```ignore
/// use mneme::prelude::*;
/// ```
pub mod prelude {
    pub use mneme_macros::{await_step, flow, step, FlowType};

    pub use crate::executor::{
        await_external_signal, idempotency_key, idempotency_key_parts, Engine, EngineConfig,
        FlowHandle, FlowOutcome,
    };

    pub use crate::storage::ExecutionLog;
    pub use crate::storage::InMemoryExecutionLog;

    #[cfg(feature = "sqlite")]
    pub use crate::storage::SqliteExecutionLog;

    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
