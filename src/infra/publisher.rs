//! In-process event bus.

use crate::domain::{RunEvent, WorkflowResult};
use crate::ports::EventPublisher;
use crate::structured_logger::StructuredLogger;
use async_trait::async_trait;
use cqrs_es::DomainEvent;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 1024;

/// Fans events out to subscribers over a tokio broadcast channel, keeps a
/// history of everything published, and optionally journals each event.
pub struct BroadcastPublisher {
    sender: broadcast::Sender<RunEvent>,
    history: Mutex<Vec<RunEvent>>,
    journal: Option<Arc<StructuredLogger>>,
}

impl BroadcastPublisher {
    pub fn new(journal: Option<Arc<StructuredLogger>>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(Vec::new()),
            journal,
        }
    }

    /// Everything published so far, oldest first.
    pub fn history(&self) -> Vec<RunEvent> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: RunEvent) -> WorkflowResult<()> {
        debug!(event_type = %event.event_type(), run_id = ?event.run_id(), "publish");
        if let Some(journal) = &self.journal {
            journal.log_run_event(&event);
        }
        if let Ok(mut history) = self.history.lock() {
            history.push(event.clone());
        }
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}
