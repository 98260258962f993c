use crate::domain::{RunEvent, WorkflowResult};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Publishes domain events after the state that produced them was saved.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: RunEvent) -> WorkflowResult<()>;

    async fn publish_all(&self, events: Vec<RunEvent>) -> WorkflowResult<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// Receives every event published after the call.
    fn subscribe(&self) -> broadcast::Receiver<RunEvent>;
}
