//! [`WebSocketBroadcaster`] adapter for local/dev deployments: no actual
//! socket server, updates fan out over a broadcast channel any attached
//! dashboard client can subscribe to.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::ports::websocket_broadcaster::{ProgressUpdate, WebSocketBroadcaster};
use crate::error::CoordinatorResult;

pub struct ChannelBroadcaster {
    sender: broadcast::Sender<ProgressUpdate>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl WebSocketBroadcaster for ChannelBroadcaster {
    async fn enqueue(&self, update: ProgressUpdate) -> CoordinatorResult<()> {
        // No subscribers is not an error: the dashboard is an optional
        // external collaborator (§1 Scope).
        if self.sender.send(update).is_err() {
            debug!("no subscribers attached to progress broadcaster");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_enqueued_update() {
        let broadcaster = ChannelBroadcaster::new(16);
        let mut receiver = broadcaster.subscribe();
        let update = ProgressUpdate {
            id: uuid::Uuid::new_v4(),
            update_type: "optimization_progress".to_string(),
            timestamp: chrono::Utc::now(),
            data: serde_json::json!({"state": "applying"}),
        };
        broadcaster.enqueue(update.clone()).await.unwrap();
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.id, update.id);
    }

    #[tokio::test]
    async fn enqueue_without_subscribers_does_not_error() {
        let broadcaster = ChannelBroadcaster::new(16);
        let update = ProgressUpdate { id: uuid::Uuid::new_v4(), update_type: "x".to_string(), timestamp: chrono::Utc::now(), data: serde_json::Value::Null };
        assert!(broadcaster.enqueue(update).await.is_ok());
    }
}
