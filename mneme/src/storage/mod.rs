//! Persistence layer for the execution log.
//!
//! This module hides the storage backend behind the [`ExecutionLog`]
//! trait. Two implementations are provided: [`SqliteExecutionLog`]
//! (durable, behind the default `sqlite` feature) and
//! [`InMemoryExecutionLog`] (tests and ephemeral embedding).
//!
//! The log is keyed by `(flow_id, step)`. Rows are created by
//! [`ExecutionLog::log_invocation_start`] and finished by
//! [`ExecutionLog::log_invocation_completion`]; a restart of an existing
//! row only increments `attempts` and leaves every other column at its
//! first-start value.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryExecutionLog;
#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteExecutionLog};

use crate::core::{CoreError, Invocation, InvocationStatus};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer error type.
///
/// Wraps the underlying database and codec errors while preserving the
/// full error chain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed")]
    Database(#[from] rusqlite::Error),

    /// Failed to get a connection from the pool.
    #[cfg(feature = "sqlite")]
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A core serialization or parsing error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O operation failed.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// A completion was logged for a row that does not exist.
    #[error("invocation not found: flow={id}, step={step}")]
    InvocationNotFound { id: Uuid, step: i32 },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Everything needed to record the start of an invocation.
///
/// Groups the columns written on first start; on conflict only
/// `attempts` changes.
pub struct StartRecord<'a> {
    /// Flow identifier.
    pub id: Uuid,
    /// Step number within the flow (0 is the flow entry).
    pub step: i32,
    /// Stable flow type identifier, for drift detection and recovery.
    pub class_name: &'a str,
    /// Method signature string, for drift detection.
    pub method_name: &'a str,
    /// Declared minimum wait before the body runs.
    pub delay: Option<Duration>,
    /// Initial status (`Pending`, or `WaitingForSignal` for await paths).
    pub status: InvocationStatus,
    /// Serialized argument list.
    pub parameters: &'a str,
}

/// Async interface for execution log backends.
///
/// Implementations must be thread-safe; rows for different flows are
/// independent and a single flow has one logical writer at a time.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Record the start of an invocation.
    ///
    /// Upsert semantics: an absent row is inserted with `attempts = 1`
    /// and the given values; an existing row gets `attempts + 1` and
    /// keeps all other columns at their first-start values.
    async fn log_invocation_start(&self, record: StartRecord<'_>) -> Result<()>;

    /// Record the completion of an invocation, making it terminal.
    ///
    /// Fails with [`StorageError::InvocationNotFound`] if the row was
    /// never started.
    async fn log_invocation_completion(
        &self,
        id: Uuid,
        step: i32,
        return_value: &str,
    ) -> Result<Invocation>;

    /// Point lookup by `(flow_id, step)`.
    async fn get_invocation(&self, id: Uuid, step: i32) -> Result<Option<Invocation>>;

    /// The row with the highest step number for a flow.
    async fn get_latest_invocation(&self, id: Uuid) -> Result<Option<Invocation>>;

    /// All rows for a flow, ascending by step.
    async fn get_invocations_for_flow(&self, id: Uuid) -> Result<Vec<Invocation>>;

    /// All flow-entry rows (`step = 0`) that have not completed, ordered
    /// by first-start timestamp ascending.
    async fn get_incomplete_flows(&self) -> Result<Vec<Invocation>>;

    /// Drop and recreate the log. Administrative and test use only.
    async fn reset(&self) -> Result<()>;
}

#[async_trait]
impl ExecutionLog for Box<dyn ExecutionLog> {
    async fn log_invocation_start(&self, record: StartRecord<'_>) -> Result<()> {
        (**self).log_invocation_start(record).await
    }

    async fn log_invocation_completion(
        &self,
        id: Uuid,
        step: i32,
        return_value: &str,
    ) -> Result<Invocation> {
        (**self)
            .log_invocation_completion(id, step, return_value)
            .await
    }

    async fn get_invocation(&self, id: Uuid, step: i32) -> Result<Option<Invocation>> {
        (**self).get_invocation(id, step).await
    }

    async fn get_latest_invocation(&self, id: Uuid) -> Result<Option<Invocation>> {
        (**self).get_latest_invocation(id).await
    }

    async fn get_invocations_for_flow(&self, id: Uuid) -> Result<Vec<Invocation>> {
        (**self).get_invocations_for_flow(id).await
    }

    async fn get_incomplete_flows(&self) -> Result<Vec<Invocation>> {
        (**self).get_incomplete_flows().await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }
}
