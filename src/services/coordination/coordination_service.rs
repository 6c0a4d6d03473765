//! Coordination Service (C5, §4.5): shared-resource locks, coordination
//! events, conflict detection, and cross-pollination triggers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::agent::AgentContext;
use crate::domain::models::resource::{
    AccessLogEntry, Conflict, CoordinationEvent, CoordinationEventType, LockMode, ResolvedConflict, ResourceLock,
    SharedResource,
};
use crate::domain::models::task::BoundedHistory;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::services::bus::MessageBus;

const EVENT_HISTORY_CAPACITY: usize = 1_000;
const EVENT_TTL_HOURS: i64 = 24;
const ACCESS_LOG_CAPACITY: usize = 20;
const RESOLVED_CONFLICT_HISTORY: usize = 200;

struct State {
    resources: HashMap<Uuid, SharedResource>,
    events: BoundedHistory<CoordinationEvent>,
    agents: HashMap<Uuid, AgentContext>,
    optimization_targets: Vec<(Uuid, Vec<String>, chrono::DateTime<Utc>)>,
    resolved_conflicts: BoundedHistory<ResolvedConflict>,
    conflicts_resolved: u64,
}

pub struct CoordinationServiceConfig {
    pub resource_lock_timeout_seconds: i64,
}

pub struct CoordinationService {
    state: RwLock<State>,
    bus: Arc<MessageBus>,
    config: CoordinationServiceConfig,
}

impl CoordinationService {
    pub fn new(bus: Arc<MessageBus>, config: CoordinationServiceConfig) -> Self {
        Self {
            state: RwLock::new(State {
                resources: HashMap::new(),
                events: BoundedHistory::new(EVENT_HISTORY_CAPACITY),
                agents: HashMap::new(),
                optimization_targets: Vec::new(),
                resolved_conflicts: BoundedHistory::new(RESOLVED_CONFLICT_HISTORY),
                conflicts_resolved: 0,
            }),
            bus,
            config,
        }
    }

    pub async fn register_resource(&self, resource: SharedResource) -> Uuid {
        let id = resource.id;
        self.state.write().await.resources.insert(id, resource);
        id
    }

    pub async fn register_agent(&self, context: AgentContext) {
        let id = context.agent_id;
        self.state.write().await.agents.insert(id, context);
        self.publish_event(CoordinationEvent::new(CoordinationEventType::AgentJoined, id, serde_json::Value::Null))
            .await;
    }

    /// `request_access(agent, resource, mode, timeout)` (§4.5 "Resource
    /// locks"). `timeout` is accepted for API parity with the spec but
    /// only `mode == write` takes a lock; reads never block.
    #[instrument(skip(self))]
    pub async fn request_access(&self, agent: Uuid, resource_id: Uuid, mode: LockMode, _timeout: std::time::Duration) -> CoordinatorResult<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let Some(resource) = state.resources.get_mut(&resource_id) else {
            return Err(CoordinatorError::not_found("shared_resource", resource_id));
        };

        if mode == LockMode::Write {
            if let Some(lock) = &resource.lock {
                if lock.holder != agent {
                    if lock.is_expired(now) {
                        info!(%resource_id, "reclaiming expired lock");
                    } else {
                        return Err(CoordinatorError::Conflict(format!(
                            "resource {resource_id} is locked by {}",
                            lock.holder
                        )));
                    }
                }
            }
            resource.lock = Some(ResourceLock {
                holder: agent,
                locked_at: now,
                timeout: chrono::Duration::seconds(self.config.resource_lock_timeout_seconds),
            });
        }
        resource.access_log.push(AccessLogEntry { agent_id: agent, mode, timestamp: now });
        drop(state);

        if mode == LockMode::Write {
            self.publish_event(CoordinationEvent::new(
                CoordinationEventType::ResourceClaimed,
                agent,
                serde_json::json!({"resource_id": resource_id}),
            ))
            .await;
        }
        Ok(())
    }

    /// `release_access(agent, resource)`: clears the lock iff the caller
    /// holds it (§4.5).
    pub async fn release_access(&self, agent: Uuid, resource_id: Uuid) -> CoordinatorResult<()> {
        let released = {
            let mut state = self.state.write().await;
            let Some(resource) = state.resources.get_mut(&resource_id) else {
                return Err(CoordinatorError::not_found("shared_resource", resource_id));
            };
            if resource.is_locked_by(agent) {
                resource.lock = None;
                true
            } else {
                false
            }
        };
        if released {
            self.publish_event(CoordinationEvent::new(
                CoordinationEventType::ResourceReleased,
                agent,
                serde_json::json!({"resource_id": resource_id}),
            ))
            .await;
        }
        Ok(())
    }

    /// Background sweep reclaiming locks whose holder hasn't released
    /// past the timeout (§4.5 "A background sweep every minute reclaims
    /// expired locks").
    pub async fn lock_sweep_tick(&self) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        for resource in state.resources.values_mut() {
            if let Some(lock) = &resource.lock {
                if lock.is_expired(now) {
                    warn!(resource_id = %resource.id, "sweeping expired lock");
                    resource.lock = None;
                }
            }
        }
    }

    /// Broadcasts through the bus and retains in the bounded ring
    /// (§4.5 "Event fan-out").
    pub async fn publish_event(&self, event: CoordinationEvent) {
        let mut event = event;
        if event.expires_at.is_none() {
            event.expires_at = Some(event.timestamp + chrono::Duration::hours(EVENT_TTL_HOURS));
        }

        let msg = crate::domain::models::message::Message::new(
            crate::domain::models::message::MessageType::CoordinationEvent,
            event.origin_agent,
            serde_json::to_value(&event).unwrap_or_default(),
        );
        self.bus.publish(&msg).await;

        self.state.write().await.events.push(event);
    }

    pub async fn recent_events(&self) -> Vec<CoordinationEvent> {
        let now = Utc::now();
        self.state.read().await.events.iter().filter(|e| !e.is_expired(now)).cloned().collect()
    }

    /// `detect_conflicts(agent, proposed_changes)`: resource conflicts
    /// (another agent touched a target in the last hour) and
    /// optimization conflicts (overlapping target files from a prior
    /// recommendation) (§4.5 "Conflict detection").
    pub async fn detect_conflicts(&self, agent: Uuid, proposed_targets: &[String]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        let now = Utc::now();
        let state = self.state.read().await;

        for resource in state.resources.values() {
            if proposed_targets.iter().any(|t| t == &resource.name) {
                for entry in resource.access_log.iter() {
                    if entry.agent_id != agent && now - entry.timestamp < chrono::Duration::hours(1) {
                        conflicts.push(Conflict::Resource {
                            resource_id: resource.id,
                            other_agent: entry.agent_id,
                            accessed_at: entry.timestamp,
                        });
                    }
                }
            }
        }

        for (other_agent, targets, recorded_at) in &state.optimization_targets {
            if *other_agent == agent {
                continue;
            }
            let overlap: Vec<String> = targets.iter().filter(|t| proposed_targets.contains(t)).cloned().collect();
            if !overlap.is_empty() {
                let recency_factor = (1.0 - (now - *recorded_at).num_seconds() as f64 / 3600.0).clamp(0.0, 1.0);
                let severity = (overlap.len() as f64) * recency_factor;
                conflicts.push(Conflict::Optimization {
                    other_agent: *other_agent,
                    overlapping_files: overlap,
                    severity,
                });
            }
        }
        conflicts
    }

    pub async fn record_optimization_targets(&self, agent: Uuid, targets: Vec<String>) {
        let mut state = self.state.write().await;
        state.optimization_targets.push((agent, targets, Utc::now()));
        if state.optimization_targets.len() > 500 {
            state.optimization_targets.remove(0);
        }
    }

    /// Resolves one conflict asynchronously: notifies the proposer with
    /// a suggested action and retains the record (§4.5, SPEC_FULL
    /// supplement retention).
    pub async fn resolve_conflict(&self, proposer: Uuid, conflict: Conflict) {
        let suggested_action = "coordinate with other agents before proceeding".to_string();
        self.publish_event(CoordinationEvent::new(
            CoordinationEventType::ConflictDetected,
            proposer,
            serde_json::json!({"suggested_action": suggested_action}),
        ))
        .await;

        let mut state = self.state.write().await;
        state.conflicts_resolved += 1;
        state.resolved_conflicts.push(ResolvedConflict {
            conflict,
            proposer,
            suggested_action,
            resolved_at: Utc::now(),
        });
    }

    pub async fn conflicts_resolved(&self) -> u64 {
        self.state.read().await.conflicts_resolved
    }

    /// Pairs up agents with overlapping specializations and emits a
    /// `cross_pollination` event per pairing, top-k per cycle (§4.5
    /// "Cross-pollination").
    pub async fn cross_pollination_tick(&self, top_k: usize) {
        let pairs = {
            let state = self.state.read().await;
            let agents: Vec<&AgentContext> = state.agents.values().collect();
            let mut scored = Vec::new();
            for i in 0..agents.len() {
                for j in (i + 1)..agents.len() {
                    let overlap = agents[i]
                        .specializations
                        .iter()
                        .filter(|s| agents[j].specializations.contains(s))
                        .count();
                    if overlap > 0 {
                        scored.push((overlap, agents[i].agent_id, agents[j].agent_id));
                    }
                }
            }
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored.into_iter().take(top_k).map(|(_, a, b)| (a, b)).collect::<Vec<_>>()
        };

        for (a, b) in pairs {
            self.publish_event(CoordinationEvent::new(
                CoordinationEventType::CrossPollination,
                a,
                serde_json::json!({"paired_with": b}),
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::resource::ResourceType;
    use crate::services::bus::InMemoryStore;

    fn service() -> CoordinationService {
        let bus = Arc::new(MessageBus::new(Arc::new(InMemoryStore::new()), "swarm", 16));
        CoordinationService::new(bus, CoordinationServiceConfig { resource_lock_timeout_seconds: 300 })
    }

    #[tokio::test]
    async fn second_writer_refused_then_granted_after_timeout() {
        let svc = service();
        let resource = SharedResource::new("file.txt", ResourceType::File);
        let resource_id = svc.register_resource(resource).await;
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        svc.request_access(x, resource_id, LockMode::Write, std::time::Duration::from_secs(1)).await.unwrap();
        let refused = svc.request_access(y, resource_id, LockMode::Write, std::time::Duration::from_secs(1)).await;
        assert!(refused.is_err());

        {
            let mut state = svc.state.write().await;
            let r = state.resources.get_mut(&resource_id).unwrap();
            r.lock.as_mut().unwrap().locked_at = Utc::now() - chrono::Duration::seconds(301);
        }

        svc.request_access(y, resource_id, LockMode::Write, std::time::Duration::from_secs(1)).await.unwrap();
        let state = svc.state.read().await;
        assert_eq!(state.resources.get(&resource_id).unwrap().lock.as_ref().unwrap().holder, y);
    }

    #[tokio::test]
    async fn release_then_request_restores_unlocked_and_succeeds() {
        let svc = service();
        let resource = SharedResource::new("file.txt", ResourceType::File);
        let resource_id = svc.register_resource(resource).await;
        let agent = Uuid::new_v4();
        svc.request_access(agent, resource_id, LockMode::Write, std::time::Duration::from_secs(1)).await.unwrap();
        svc.release_access(agent, resource_id).await.unwrap();

        let state = svc.state.read().await;
        assert!(state.resources.get(&resource_id).unwrap().lock.is_none());
        drop(state);

        let other = Uuid::new_v4();
        svc.request_access(other, resource_id, LockMode::Write, std::time::Duration::from_secs(1)).await.unwrap();
    }
}
