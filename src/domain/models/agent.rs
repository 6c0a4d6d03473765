//! Agent domain model: the template (`AgentSpec`) agents are launched from
//! and the runtime record (`AgentInstance`) tracking one launch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::task::BoundedHistory;

/// Closed set of agent types the kernel knows how to route tasks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Scraping,
    Keyword,
    ApiReliability,
    Performance,
    DataQuality,
    Monitoring,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scraping => "scraping",
            Self::Keyword => "keyword",
            Self::ApiReliability => "api-reliability",
            Self::Performance => "performance",
            Self::DataQuality => "data-quality",
            Self::Monitoring => "monitoring",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "scraping" => Some(Self::Scraping),
            "keyword" => Some(Self::Keyword),
            "api-reliability" => Some(Self::ApiReliability),
            "performance" => Some(Self::Performance),
            "data-quality" => Some(Self::DataQuality),
            "monitoring" => Some(Self::Monitoring),
            _ => None,
        }
    }
}

/// Restart policy applied by the health loop when an instance goes critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    Never,
    OnFailure,
    Always,
}

/// How a spec's health descriptor should be probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HealthCheckDescriptor {
    Http { path: String, port: u16, timeout_seconds: u64 },
    Tcp { port: u16, timeout_seconds: u64 },
    Custom { command: String, timeout_seconds: u64 },
}

/// Immutable template an [`AgentInstance`] is launched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: Uuid,
    pub name: String,
    pub agent_type: AgentType,
    pub container_image: String,
    pub cpu_limit_millis: u32,
    pub memory_limit_mb: u32,
    pub environment: BTreeMap<String, String>,
    pub volume_mounts: Vec<String>,
    pub exposed_ports: Vec<u16>,
    pub health_check: Option<HealthCheckDescriptor>,
    pub restart_policy: RestartPolicy,
    pub priority_tier: u8,
    pub desired_replicas: u32,
    pub dependencies: Vec<Uuid>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, agent_type: AgentType, container_image: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            agent_type,
            container_image: container_image.into(),
            cpu_limit_millis: 500,
            memory_limit_mb: 256,
            environment: BTreeMap::new(),
            volume_mounts: Vec::new(),
            exposed_ports: Vec::new(),
            health_check: None,
            restart_policy: RestartPolicy::OnFailure,
            priority_tier: 1,
            desired_replicas: 1,
            dependencies: Vec::new(),
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.desired_replicas = replicas;
        self
    }

    pub fn with_health_check(mut self, descriptor: HealthCheckDescriptor) -> Self {
        self.health_check = Some(descriptor);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Environment map a launcher sees, augmented with the bus/store
    /// addressing and instance identity fields §4.3 names.
    pub fn launch_environment(&self, instance_id: Uuid, bus_address: &str, store_address: &str, log_level: &str) -> BTreeMap<String, String> {
        let mut env = self.environment.clone();
        env.insert("AGENT_ID".to_string(), instance_id.to_string());
        env.insert("AGENT_TYPE".to_string(), self.agent_type.as_str().to_string());
        env.insert("BUS_ADDRESS".to_string(), bus_address.to_string());
        env.insert("STORE_ADDRESS".to_string(), store_address.to_string());
        env.insert("LOG_LEVEL".to_string(), log_level.to_string());
        env
    }
}

/// Outcome of one health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthResult {
    Healthy,
    Warning,
    Critical,
}

/// Lifecycle state of a launched [`AgentInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Starting,
    Healthy,
    Warning,
    Critical,
    Stopped,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn is_eligible_for_work(self) -> bool {
        matches!(self, Self::Healthy | Self::Warning)
    }
}

/// Opaque handle into the container runtime; the kernel never interprets
/// its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle(pub String);

/// Runtime record of one launched agent. Owned exclusively by the Agent
/// Manager; other components reference it only by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: Uuid,
    pub spec_id: Uuid,
    pub agent_type: AgentType,
    pub handle: ContainerHandle,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub health_history: BoundedHistory<HealthResult>,
    pub current_tasks: u32,
    pub max_concurrent: u32,
    pub restart_count: u32,
    pub rolling_error_rate: f64,
    pub health_check: Option<HealthCheckDescriptor>,
}

impl AgentInstance {
    pub fn launch(spec: &AgentSpec, handle: ContainerHandle, max_concurrent: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            spec_id: spec.id,
            agent_type: spec.agent_type,
            handle,
            status: InstanceStatus::Pending,
            created_at: now,
            last_seen: now,
            health_history: BoundedHistory::new(10),
            current_tasks: 0,
            max_concurrent,
            restart_count: 0,
            rolling_error_rate: 0.0,
            health_check: spec.health_check.clone(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.current_tasks < self.max_concurrent
    }

    pub fn record_health(&mut self, result: HealthResult) {
        self.health_history.push(result);
        self.last_seen = Utc::now();
        self.status = match result {
            HealthResult::Healthy => InstanceStatus::Healthy,
            HealthResult::Warning => InstanceStatus::Warning,
            HealthResult::Critical => InstanceStatus::Critical,
        };
    }

    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            0.0
        } else {
            f64::from(self.current_tasks) / f64::from(self.max_concurrent)
        }
    }
}

/// Rolling stats used by the load balancer to score a candidate, per §3
/// and the adaptive formula in §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentWorkload {
    pub current_tasks: u32,
    pub max_concurrent: u32,
    pub avg_execution_time_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub last_completion: Option<DateTime<Utc>>,
    pub performance_score: f64,
    pub selection_count: u64,
}

impl AgentWorkload {
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            current_tasks: 0,
            max_concurrent,
            avg_execution_time_ms: 0.0,
            success_rate: 1.0,
            error_rate: 0.0,
            last_completion: None,
            performance_score: 1.0,
            selection_count: 0,
        }
    }

    /// Recompute `success_rate`, `error_rate`, `avg_execution_time_ms` and
    /// the composite `performance_score` from a rolling window of
    /// samples (§4.4 "Agent performance update").
    pub fn recompute_from_samples(&mut self, samples: &[super::task::PerformanceSample]) {
        if samples.is_empty() {
            return;
        }
        let total = samples.len() as f64;
        let successes = samples.iter().filter(|s| s.success).count() as f64;
        self.success_rate = successes / total;
        self.error_rate = 1.0 - self.success_rate;
        self.avg_execution_time_ms =
            samples.iter().map(|s| s.execution_time_ms as f64).sum::<f64>() / total;
        let time_score = (1.0 - self.avg_execution_time_ms / 300_000.0).max(0.0);
        self.performance_score = 0.6 * self.success_rate + 0.4 * time_score;
        self.last_completion = samples.last().map(|s| s.timestamp);
    }
}

/// Per-agent rolling performance bookkeeping owned by the Task Orchestrator:
/// the workload scoring struct plus its backing sample history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub workload: AgentWorkload,
    pub history: BoundedHistory<super::task::PerformanceSample>,
}

impl AgentPerformance {
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            workload: AgentWorkload::new(max_concurrent),
            history: BoundedHistory::new(100),
        }
    }

    pub fn record(&mut self, sample: super::task::PerformanceSample) {
        self.history.push(sample);
        let samples: Vec<_> = self.history.iter().cloned().collect();
        self.workload.recompute_from_samples(&samples);
    }
}

/// Active-agent registry entry the Coordination Service uses for
/// cross-pollination pairing (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: Uuid,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    pub specializations: Vec<String>,
    pub recent_metrics: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::PerformanceSample;

    #[test]
    fn performance_score_formula() {
        let mut perf = AgentPerformance::new(3);
        for _ in 0..10 {
            perf.record(PerformanceSample {
                success: true,
                execution_time_ms: 0,
                timestamp: Utc::now(),
            });
        }
        assert!((perf.workload.performance_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn instance_capacity() {
        let spec = AgentSpec::new("scraper-1", AgentType::Scraping, "img:latest");
        let mut instance = AgentInstance::launch(&spec, ContainerHandle("c1".into()), 3);
        assert!(instance.has_capacity());
        instance.current_tasks = 3;
        assert!(!instance.has_capacity());
    }

    #[test]
    fn health_history_bounded_to_ten() {
        let spec = AgentSpec::new("scraper-1", AgentType::Scraping, "img:latest");
        let mut instance = AgentInstance::launch(&spec, ContainerHandle("c1".into()), 3);
        for _ in 0..15 {
            instance.record_health(HealthResult::Healthy);
        }
        assert_eq!(instance.health_history.len(), 10);
    }
}
