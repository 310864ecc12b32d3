use super::{ExecutionLog, Result, StartRecord, StorageError};
use crate::core::{Invocation, InvocationStatus};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

/// In-memory execution log backed by a concurrent map.
///
/// Suitable for tests and for embedding the engine without a durable
/// store; nothing survives a process restart.
pub struct InMemoryExecutionLog {
    invocations: DashMap<(Uuid, i32), Invocation>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self {
            invocations: DashMap::new(),
        }
    }
}

impl Default for InMemoryExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn log_invocation_start(&self, record: StartRecord<'_>) -> Result<()> {
        let StartRecord {
            id,
            step,
            class_name,
            method_name,
            delay,
            status,
            parameters,
        } = record;

        let key = (id, step);
        match self.invocations.get_mut(&key) {
            Some(mut entry) => {
                // Restart of an existing row: attempts moves, nothing else.
                let bumped = Invocation::new(
                    entry.id(),
                    entry.step(),
                    entry.timestamp(),
                    entry.class_name().to_string(),
                    entry.method_name().to_string(),
                    entry.status(),
                    entry.attempts() + 1,
                    entry.parameters().to_string(),
                    entry.return_value().map(str::to_string),
                    entry.delay().map(|d| d.as_millis() as i64),
                );
                *entry = bumped;
            }
            None => {
                let invocation = Invocation::new(
                    id,
                    step,
                    Utc::now(),
                    class_name.to_string(),
                    method_name.to_string(),
                    status,
                    1,
                    parameters.to_string(),
                    None,
                    delay.map(|d| d.as_millis() as i64),
                );
                self.invocations.insert(key, invocation);
            }
        }

        Ok(())
    }

    async fn log_invocation_completion(
        &self,
        id: Uuid,
        step: i32,
        return_value: &str,
    ) -> Result<Invocation> {
        let key = (id, step);
        if let Some(mut entry) = self.invocations.get_mut(&key) {
            let completed = Invocation::new(
                entry.id(),
                entry.step(),
                entry.timestamp(),
                entry.class_name().to_string(),
                entry.method_name().to_string(),
                InvocationStatus::Complete,
                entry.attempts(),
                entry.parameters().to_string(),
                Some(return_value.to_string()),
                entry.delay().map(|d| d.as_millis() as i64),
            );
            *entry = completed.clone();
            Ok(completed)
        } else {
            Err(StorageError::InvocationNotFound { id, step })
        }
    }

    async fn get_invocation(&self, id: Uuid, step: i32) -> Result<Option<Invocation>> {
        Ok(self
            .invocations
            .get(&(id, step))
            .map(|entry| entry.value().clone()))
    }

    async fn get_latest_invocation(&self, id: Uuid) -> Result<Option<Invocation>> {
        let invocations = self.get_invocations_for_flow(id).await?;
        Ok(invocations.into_iter().max_by_key(|inv| inv.step()))
    }

    async fn get_invocations_for_flow(&self, id: Uuid) -> Result<Vec<Invocation>> {
        let mut invocations: Vec<Invocation> = self
            .invocations
            .iter()
            .filter(|entry| entry.key().0 == id)
            .map(|entry| entry.value().clone())
            .collect();

        invocations.sort_by_key(|inv| inv.step());
        Ok(invocations)
    }

    async fn get_incomplete_flows(&self) -> Result<Vec<Invocation>> {
        let mut entries: Vec<Invocation> = self
            .invocations
            .iter()
            .filter(|entry| {
                entry.value().is_flow() && entry.value().status() != InvocationStatus::Complete
            })
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by_key(|inv| inv.timestamp());
        Ok(entries)
    }

    async fn reset(&self) -> Result<()> {
        self.invocations.clear();
        Ok(())
    }
}
