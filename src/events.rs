//! Typed notifications published after an import run.

use crate::schema::{ImportKind, ImportOutcome};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportEvent {
    ProductsImported { outcome: ImportOutcome },
    UsersImported { outcome: ImportOutcome },
    StockUpdated { outcome: ImportOutcome },
}

impl ImportEvent {
    pub fn for_run(kind: ImportKind, outcome: ImportOutcome) -> Self {
        match kind {
            ImportKind::Products => ImportEvent::ProductsImported { outcome },
            ImportKind::Users => ImportEvent::UsersImported { outcome },
            ImportKind::Restock => ImportEvent::StockUpdated { outcome },
        }
    }
}

/// Broadcast channel shared by the importer and whoever listens for results.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ImportEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: ImportEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::debug!("No subscriber for import event");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let outcome = ImportOutcome {
            added: 2,
            ..Default::default()
        };

        assert_eq!(bus.publish(ImportEvent::for_run(ImportKind::Restock, outcome)), 1);
        assert_eq!(rx.recv().await.unwrap(), ImportEvent::StockUpdated { outcome });
    }

    #[test]
    fn test_publish_without_subscriber() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(ImportEvent::for_run(ImportKind::Users, ImportOutcome::default())), 0);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = ImportEvent::for_run(ImportKind::Products, ImportOutcome::default());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "products_imported");
        assert_eq!(value["outcome"]["added"], 0);
    }
}
