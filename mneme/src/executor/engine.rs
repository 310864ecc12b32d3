//! The engine value: storage, rendezvous registry, recovery
//! configuration, and the flow factory.
//!
//! The engine is an explicit value rather than process-wide state; an
//! application constructs one per store and passes it around. Cloning is
//! cheap and shares the underlying state.

use super::context::{ExecutionContext, StorageWrapper};
use super::error::Result;
use super::handle::FlowHandle;
use super::recovery::Registry;
use super::rendezvous::Rendezvous;
use crate::core::{serialize_value, FlowType};
use crate::storage::ExecutionLog;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::error;
use uuid::Uuid;

/// Engine options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether [`Engine::start`] schedules recovery of incomplete flows.
    pub recover_on_startup: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recover_on_startup: true,
        }
    }
}

/// Durable execution engine bound to one execution log.
pub struct Engine<S: ExecutionLog> {
    storage: Arc<S>,
    rendezvous: Arc<Rendezvous>,
    registry: Arc<RwLock<Registry<S>>>,
    config: EngineConfig,
}

impl<S: ExecutionLog> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            rendezvous: Arc::clone(&self.rendezvous),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }
}

impl<S: ExecutionLog + 'static> Engine<S> {
    /// Creates an engine over the given execution log with default
    /// configuration.
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_config(storage, EngineConfig::default())
    }

    /// Creates an engine with explicit configuration.
    pub fn with_config(storage: Arc<S>, config: EngineConfig) -> Self {
        Self {
            storage,
            rendezvous: Arc::new(Rendezvous::new()),
            registry: Arc::new(RwLock::new(Registry::new())),
            config,
        }
    }

    /// Binds a flow value to a flow id and returns the handle that
    /// drives it.
    ///
    /// The flow value is serialized into the entry row so that recovery
    /// can rebuild it after a restart; it must therefore round-trip
    /// through the log codec.
    pub fn flow<T>(&self, flow: T, id: Uuid) -> Result<FlowHandle<T>>
    where
        T: FlowType + Serialize,
    {
        let parameters = serialize_value(&flow)?;

        let erased: Box<dyn ExecutionLog> = Box::new(StorageWrapper(Arc::clone(&self.storage)));
        let ctx = Arc::new(ExecutionContext::new(
            id,
            Arc::new(erased),
            Arc::clone(&self.rendezvous),
            T::type_id().to_string(),
            parameters,
        ));

        Ok(FlowHandle::new(id, Arc::new(flow), ctx))
    }

    /// Starts the engine: schedules startup recovery on a background
    /// task when `recover_on_startup` is set.
    ///
    /// Recovery runs at most once per call and does not poll.
    pub fn start(&self) {
        if !self.config.recover_on_startup {
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.recover_incomplete_flows().await {
                error!("Startup recovery failed: {}", e);
            }
        });
    }

    /// The execution log this engine writes to.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub(super) fn registry(&self) -> &Arc<RwLock<Registry<S>>> {
        &self.registry
    }
}
