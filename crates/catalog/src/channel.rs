use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::store::StoreName;

/// Change notice shared between cache handles over a [`CacheChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CacheEvent {
    Updated { store: StoreName, key: String },
    Cleared,
}

/// Named fan-out channel; every handle created from the same channel sees
/// every other handle's writes.
#[derive(Debug, Clone)]
pub struct CacheChannel {
    name: String,
    sender: broadcast::Sender<CacheEvent>,
}

impl CacheChannel {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Having no listeners is not an error.
    pub fn publish(&self, event: CacheEvent) {
        if let Err(e) = self.sender.send(event) {
            trace!("channel {}: no listeners for {:?}", self.name, e.0);
        }
    }
}
