//! Process-local signal rendezvous.
//!
//! Each flow id owns at most one slot: a single-permit notifier plus a
//! payload cell carrying the serialized resume arguments. The registry
//! is deliberately not persisted: after a restart a waiting flow is
//! rediscovered through the execution log and re-enters
//! `WaitingForSignal`; a fresh signal must then be delivered.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Slot {
    notify: Arc<Notify>,
    payload: Mutex<Option<String>>,
}

/// Map from flow id to its single-slot signal.
#[derive(Default)]
pub struct Rendezvous {
    slots: DashMap<Uuid, Slot>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a payload for `id` and releases one permit.
    ///
    /// Repeated signals before a consuming wait overwrite the payload
    /// and never stack more than one permit, so a waiter observes the
    /// most recent arguments exactly once.
    pub fn signal(&self, id: Uuid, payload: String) {
        let slot = self.slots.entry(id).or_default();
        *slot
            .payload
            .lock()
            .expect("rendezvous payload lock poisoned") = Some(payload);
        slot.notify.notify_one();
        debug!("Signal delivered for flow {}", id);
    }

    /// Blocks until a permit is available for `id`, consumes it, and
    /// returns the carried payload. The payload itself stays readable
    /// until the slot is released.
    pub async fn recv(&self, id: Uuid) -> String {
        let notify = {
            let slot = self.slots.entry(id).or_default();
            Arc::clone(&slot.notify)
        };

        loop {
            notify.notified().await;

            let payload = self.slots.get(&id).and_then(|slot| {
                slot.payload
                    .lock()
                    .expect("rendezvous payload lock poisoned")
                    .clone()
            });

            if let Some(payload) = payload {
                debug!("Signal consumed for flow {}", id);
                return payload;
            }
        }
    }

    /// Removes the slot for a flow. Invoked when the flow entry
    /// completes.
    pub fn release(&self, id: Uuid) {
        self.slots.remove(&id);
    }
}
