use axum::extract::ws::Message;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};
use uuid::Uuid;

/// In-memory registry of dashboard observers and the fan-out primitive.
///
/// Each observer is represented by the sending half of its connection task's
/// outbound channel. Broadcast serializes once, iterates a snapshot, and a
/// failed send evicts only that observer. Channel sends are synchronous, so
/// per-observer delivery order always matches publish order.
#[derive(Clone)]
pub struct DashboardHub {
    observers: Arc<RwLock<HashMap<Uuid, UnboundedSender<Message>>>>,
}

impl DashboardHub {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new observer, returning its id for later unregistration.
    pub fn register(&self, sender: UnboundedSender<Message>) -> Uuid {
        let id = Uuid::new_v4();
        self.observers.write().insert(id, sender);
        id
    }

    pub fn unregister(&self, id: &Uuid) {
        self.observers.write().remove(id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Deliver a message to every registered observer. Individual failures
    /// remove only that observer and never abort delivery to the rest.
    pub fn broadcast<T: Serialize>(&self, event: &T) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize broadcast message: {}", e);
                return;
            }
        };

        // Snapshot so eviction never mutates the map mid-iteration.
        let snapshot: Vec<(Uuid, UnboundedSender<Message>)> = self
            .observers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if snapshot.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(Message::Text(json.clone().into())).is_err() {
                error!("Error broadcasting to observer {}", id);
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut observers = self.observers.write();
            for id in dead {
                observers.remove(&id);
                warn!("Removed dead observer {}", id);
            }
        }
    }
}

impl Default for DashboardHub {
    fn default() -> Self {
        Self::new()
    }
}
