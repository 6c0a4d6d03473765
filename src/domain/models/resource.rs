//! Shared resource + coordination event models owned by the Coordination
//! Service (§3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::task::BoundedHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    File,
    Database,
    Endpoint,
    Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub agent_id: Uuid,
    pub mode: LockMode,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub holder: Uuid,
    pub locked_at: DateTime<Utc>,
    pub timeout: chrono::Duration,
}

impl ResourceLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.locked_at > self.timeout
    }
}

/// A named artifact whose mutating access is serialized via an advisory,
/// timed lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedResource {
    pub id: Uuid,
    pub resource_type: ResourceType,
    pub name: String,
    pub lock: Option<ResourceLock>,
    pub metadata: BTreeMap<String, String>,
    pub access_log: BoundedHistory<AccessLogEntry>,
}

impl SharedResource {
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_type,
            name: name.into(),
            lock: None,
            metadata: BTreeMap::new(),
            access_log: BoundedHistory::new(20),
        }
    }

    pub fn is_locked_by(&self, agent: Uuid) -> bool {
        self.lock.as_ref().is_some_and(|l| l.holder == agent)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

/// Closed set of coordination event kinds (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationEventType {
    AgentJoined,
    AgentLeft,
    TaskStarted,
    TaskCompleted,
    OptimizationDiscovered,
    ConflictDetected,
    ResourceClaimed,
    ResourceReleased,
    SyncRequest,
    CrossPollination,
}

impl CoordinationEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentJoined => "agent_joined",
            Self::AgentLeft => "agent_left",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::OptimizationDiscovered => "optimization_discovered",
            Self::ConflictDetected => "conflict_detected",
            Self::ResourceClaimed => "resource_claimed",
            Self::ResourceReleased => "resource_released",
            Self::SyncRequest => "sync_request",
            Self::CrossPollination => "cross_pollination",
        }
    }
}

/// A transient, typed notification fanned out through the bus and
/// retained in a bounded window (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub id: Uuid,
    pub event_type: CoordinationEventType,
    pub origin_agent: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub priority: super::task::Priority,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CoordinationEvent {
    pub fn new(event_type: CoordinationEventType, origin_agent: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            origin_agent,
            timestamp: Utc::now(),
            payload,
            priority: super::task::Priority::Medium,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }
}

/// A detected conflict between agents over shared state (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Conflict {
    Resource {
        resource_id: Uuid,
        other_agent: Uuid,
        accessed_at: DateTime<Utc>,
    },
    Optimization {
        other_agent: Uuid,
        overlapping_files: Vec<String>,
        severity: f64,
    },
}

/// Record of a conflict resolution, retained in a bounded history
/// (SPEC_FULL supplement, from `coordination_service.py`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConflict {
    pub conflict: Conflict,
    pub proposer: Uuid,
    pub suggested_action: String,
    pub resolved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_expiry_boundary() {
        let lock = ResourceLock {
            holder: Uuid::new_v4(),
            locked_at: Utc::now() - chrono::Duration::seconds(301),
            timeout: chrono::Duration::seconds(300),
        };
        assert!(lock.is_expired(Utc::now()));
    }

    #[test]
    fn fresh_lock_not_expired() {
        let lock = ResourceLock {
            holder: Uuid::new_v4(),
            locked_at: Utc::now(),
            timeout: chrono::Duration::seconds(300),
        };
        assert!(!lock.is_expired(Utc::now()));
    }
}
