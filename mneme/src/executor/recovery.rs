//! Startup recovery of incomplete flows.
//!
//! Recovery scans the log for flow-entry rows that never completed,
//! rebuilds each flow value from the row's serialized parameters, and
//! re-drives it through a fresh handle on its own task. Replay makes
//! this safe to repeat: completed steps return their logged values and
//! only unfinished work executes.

use super::engine::Engine;
use super::error::{EngineError, FlowOutcome, Result};
use crate::core::{deserialize_value, FlowType, Invocation};
use crate::storage::ExecutionLog;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Type-erased executor that rebuilds a flow from a logged entry row and
/// re-drives it.
pub(super) type RecoverFn<S> =
    Arc<dyn Fn(Engine<S>, Invocation) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Maps stable flow type ids to their recovery executors.
pub(super) struct Registry<S: ExecutionLog> {
    executors: HashMap<String, RecoverFn<S>>,
}

impl<S: ExecutionLog> Registry<S> {
    pub(super) fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub(super) fn insert(&mut self, type_id: String, recover: RecoverFn<S>) {
        self.executors.insert(type_id, recover);
    }

    pub(super) fn get(&self, type_id: &str) -> Option<RecoverFn<S>> {
        self.executors.get(type_id).cloned()
    }
}

impl<S: ExecutionLog + 'static> Engine<S> {
    /// Registers a flow type with the entry action recovery will
    /// re-drive for it.
    ///
    /// The action receives the flow value rebuilt from the logged entry
    /// row and should invoke the same step sequence the original caller
    /// did; replay takes care of the part that already ran.
    pub fn register<T, F, Fut, R>(&self, entry: F)
    where
        T: FlowType + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let recover: RecoverFn<S> = Arc::new(move |engine: Engine<S>, invocation: Invocation| {
            let entry = entry.clone();
            Box::pin(async move {
                let id = invocation.id();
                let flow: T = match deserialize_value(invocation.parameters()) {
                    Ok(flow) => flow,
                    Err(e) => {
                        error!("Failed to rebuild flow {} from its entry row: {}", id, e);
                        return;
                    }
                };

                let handle = match engine.flow(flow, id) {
                    Ok(handle) => handle,
                    Err(e) => {
                        error!("Failed to bind recovered flow {}: {}", id, e);
                        return;
                    }
                };

                match handle.run(move |flow| entry(flow)).await {
                    Ok(FlowOutcome::Completed(_)) => {
                        info!("Recovered flow {} ran to completion", id);
                    }
                    Ok(FlowOutcome::Paused) => {
                        info!("Recovered flow {} is waiting for a signal again", id);
                    }
                    Err(e) => {
                        error!("Recovered flow {} failed: {}", id, e);
                    }
                }
            })
        });

        self.registry()
            .write()
            .expect("recovery registry lock poisoned")
            .insert(T::type_id().to_string(), recover);
    }

    /// Re-issues every pending top-level flow found in the log, oldest
    /// first. Each flow runs on its own background task; per-flow
    /// failures are logged and do not halt the rest.
    ///
    /// Idempotent: replay guarantees at most one execution of any given
    /// step across repeated calls. Returns the flow ids scheduled, in
    /// recovery order.
    pub async fn recover_incomplete_flows(&self) -> Result<Vec<Uuid>> {
        let incomplete = self.storage().get_incomplete_flows().await?;
        info!("Found {} incomplete flows for recovery", incomplete.len());

        let mut scheduled = Vec::new();
        for invocation in incomplete {
            match self.spawn_recovery(invocation) {
                Ok(id) => scheduled.push(id),
                Err(e) => warn!("Skipping flow recovery: {}", e),
            }
        }

        Ok(scheduled)
    }

    fn spawn_recovery(&self, invocation: Invocation) -> Result<Uuid> {
        let recover = self
            .registry()
            .read()
            .expect("recovery registry lock poisoned")
            .get(invocation.class_name())
            .ok_or_else(|| EngineError::NotRegistered(invocation.class_name().to_string()))?;

        let id = invocation.id();
        info!(
            "Recovering flow {} - {}.{}",
            id,
            invocation.class_name(),
            invocation.method_name()
        );

        tokio::spawn(recover(self.clone(), invocation));
        Ok(id)
    }
}
