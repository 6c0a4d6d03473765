//! Bus message envelope (§4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Priority;

/// Closed set of message kinds carried over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssignment,
    TaskResult,
    StatusUpdate,
    Metric,
    Alert,
    CoordinationEvent,
    OptimizationRequest,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskAssignment => "task_assignment",
            Self::TaskResult => "task_result",
            Self::StatusUpdate => "status_update",
            Self::Metric => "metric",
            Self::Alert => "alert",
            Self::CoordinationEvent => "coordination_event",
            Self::OptimizationRequest => "optimization_request",
        }
    }
}

/// Self-describing envelope exchanged over the bus. Serialization is
/// deterministic JSON with explicit RFC3339 timestamp strings (via
/// `chrono`'s serde support), per §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub message_type: MessageType,
    pub sender: Uuid,
    /// `None` means broadcast.
    pub recipient: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<Uuid>,
}

impl Message {
    pub fn new(message_type: MessageType, sender: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            sender,
            recipient: None,
            timestamp: Utc::now(),
            priority: Priority::Medium,
            payload,
            expires_at: None,
            correlation_id: None,
        }
    }

    pub fn to_agent(mut self, recipient: Uuid) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    /// Serialize to the wire format (§8 round-trip property).
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A single entry in the task-status hash (§6 "Task status record
/// schema").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub task_type: String,
    pub agent_id: Option<Uuid>,
    pub success: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_wire_format() {
        let msg = Message::new(MessageType::TaskResult, Uuid::new_v4(), serde_json::json!({"ok": true}))
            .with_priority(Priority::High)
            .with_correlation(Uuid::new_v4());
        let bytes = msg.to_wire().unwrap();
        let decoded = Message::from_wire(&bytes).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.message_type, msg.message_type);
        assert_eq!(decoded.priority, msg.priority);
        assert_eq!(decoded.correlation_id, msg.correlation_id);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn broadcast_has_no_recipient() {
        let msg = Message::new(MessageType::Alert, Uuid::new_v4(), serde_json::Value::Null);
        assert!(msg.is_broadcast());
        let targeted = msg.to_agent(Uuid::new_v4());
        assert!(!targeted.is_broadcast());
    }
}
