//! Port for the optimization-progress WebSocket broadcaster (§6). The
//! dashboard itself is out of scope (§1); this port only contracts the
//! typed update the engine enqueues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoordinatorResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: Uuid,
    pub update_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait WebSocketBroadcaster: Send + Sync {
    async fn enqueue(&self, update: ProgressUpdate) -> CoordinatorResult<()>;
}
