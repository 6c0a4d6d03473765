//! Task Orchestrator (C4, §4.4): the authoritative TaskExecution map, the
//! scheduling loop, result ingestion, and recommendation emission.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::agent::{AgentPerformance, AgentType};
use crate::domain::models::config::SchedulingConfig;
use crate::domain::models::optimization::{OptimizationRecommendation, RecommendationType, Severity};
use crate::domain::models::task::{Priority, TaskDefinition, TaskExecution, TaskStatus};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::services::agent_manager::AgentManager;
use crate::services::bus::{MessageBus, TaskResult};
use crate::services::orchestrator::load_balancer::{self, Candidate, SchedulingStrategy};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorMetrics {
    pub avg_queue_time_ms: f64,
    pub avg_execution_time_ms: f64,
    pub throughput_per_min: f64,
    pub queue_depths: HashMap<Priority, usize>,
}

struct State {
    executions: HashMap<Uuid, TaskExecution>,
    queues: HashMap<Priority, std::collections::VecDeque<Uuid>>,
    agent_performance: HashMap<Uuid, AgentPerformance>,
    metrics: OrchestratorMetrics,
    recent_completions: std::collections::VecDeque<chrono::DateTime<Utc>>,
    recommendations: Vec<OptimizationRecommendation>,
}

impl State {
    fn new() -> Self {
        let mut queues = HashMap::new();
        for p in Priority::DESCENDING {
            queues.insert(p, std::collections::VecDeque::new());
        }
        Self {
            executions: HashMap::new(),
            queues,
            agent_performance: HashMap::new(),
            metrics: OrchestratorMetrics::default(),
            recent_completions: std::collections::VecDeque::new(),
            recommendations: Vec::new(),
        }
    }
}

pub struct TaskOrchestrator {
    state: RwLock<State>,
    bus: Arc<MessageBus>,
    agent_manager: Arc<AgentManager>,
    config: SchedulingConfig,
    strategy: SchedulingStrategy,
}

impl TaskOrchestrator {
    pub fn new(bus: Arc<MessageBus>, agent_manager: Arc<AgentManager>, config: SchedulingConfig) -> Self {
        let strategy = SchedulingStrategy::parse_str(&config.scheduling_strategy).unwrap_or(SchedulingStrategy::Adaptive);
        Self {
            state: RwLock::new(State::new()),
            bus,
            agent_manager,
            config,
            strategy,
        }
    }

    /// Accepts a `TaskDefinition`, creates its `queued` execution, and
    /// appends it to the matching priority queue (§4.4 "Submission").
    #[instrument(skip(self, definition))]
    pub async fn submit(&self, definition: TaskDefinition) -> CoordinatorResult<Uuid> {
        let priority = definition.priority;
        let id = definition.id;
        let execution = TaskExecution::submit(definition.clone());

        self.bus.enqueue_task(&definition).await?;

        let mut state = self.state.write().await;
        state.executions.insert(id, execution);
        state.queues.get_mut(&priority).expect("all priorities pre-populated").push_back(id);
        Ok(id)
    }

    /// `cancel(task_id, reason)`: removes a queued execution from its
    /// queue, or publishes a cancel assignment to an in-flight one.
    /// Idempotent for terminal tasks (§4.4 "Cancellation", §8 boundary).
    pub async fn cancel(&self, task_id: Uuid, reason: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(execution) = state.executions.get(&task_id) else {
            return false;
        };
        if execution.status.is_terminal() {
            return false;
        }

        let priority = execution.priority();
        let was_queued = execution.status == TaskStatus::Queued;
        let assigned_agent = execution.assigned_agent;
        if was_queued {
            if let Some(q) = state.queues.get_mut(&priority) {
                q.retain(|id| *id != task_id);
            }
        }
        if let Some(exec) = state.executions.get_mut(&task_id) {
            exec.cancel(reason);
        }
        drop(state);

        if let Some(agent_id) = assigned_agent {
            let msg = crate::domain::models::message::Message::new(
                crate::domain::models::message::MessageType::TaskAssignment,
                task_id,
                serde_json::json!({"cancelled": true, "reason": reason}),
            )
            .to_agent(agent_id);
            self.bus.publish(&msg).await;
        }
        true
    }

    /// One iteration of the scheduling loop (§4.4 "Scheduling loop"):
    /// assignment pass across priorities, then a timeout sweep, then a
    /// metrics recompute.
    #[instrument(skip(self))]
    pub async fn scheduling_tick(&self) {
        self.assignment_pass().await;
        self.timeout_sweep().await;
        self.stuck_task_sweep().await;
        self.recompute_metrics().await;
        self.emit_recommendations().await;
    }

    async fn assignment_pass(&self) {
        for priority in Priority::DESCENDING {
            let queued_ids: Vec<Uuid> = {
                let state = self.state.read().await;
                state.queues.get(&priority).cloned().unwrap_or_default().into_iter().collect()
            };

            for task_id in queued_ids {
                self.try_assign(task_id).await;
            }
        }
    }

    async fn try_assign(&self, task_id: Uuid) {
        let (target_type, definition) = {
            let state = self.state.read().await;
            let Some(exec) = state.executions.get(&task_id) else { return };
            if exec.status != TaskStatus::Queued {
                return;
            }
            (exec.definition.target_agent_type.clone(), exec.definition.clone())
        };

        let agent_type = match &target_type {
            crate::domain::models::task::AgentTypeFilter::Exact(t) => AgentType::parse_str(t),
            crate::domain::models::task::AgentTypeFilter::Any => None,
        };

        let candidates_instances = if let Some(at) = agent_type {
            self.agent_manager.compatible_healthy_instances(at).await
        } else {
            // "any" compatible type: union across every known type.
            let mut all = Vec::new();
            for at in [
                AgentType::Scraping,
                AgentType::Keyword,
                AgentType::ApiReliability,
                AgentType::Performance,
                AgentType::DataQuality,
                AgentType::Monitoring,
            ] {
                all.extend(self.agent_manager.compatible_healthy_instances(at).await);
            }
            all
        };

        if candidates_instances.is_empty() {
            // §8 boundary: empty candidate set leaves the task queued.
            return;
        }

        let state = self.state.read().await;
        let workloads: Vec<_> = candidates_instances
            .iter()
            .map(|i| {
                state
                    .agent_performance
                    .get(&i.id)
                    .map(|p| p.workload.clone())
                    .unwrap_or_else(|| crate::domain::models::agent::AgentWorkload::new(i.max_concurrent))
            })
            .collect();
        drop(state);

        let candidates: Vec<Candidate> = candidates_instances
            .iter()
            .zip(workloads.iter())
            .map(|(instance, workload)| Candidate { instance, workload })
            .collect();

        let target_type_str = agent_type.map(AgentType::as_str).unwrap_or("any");
        let Some(chosen) = load_balancer::select(self.strategy, &candidates, &definition, target_type_str) else {
            return;
        };
        let chosen_id = chosen.instance.id;

        let msg = crate::domain::models::message::Message::new(
            crate::domain::models::message::MessageType::TaskAssignment,
            task_id,
            serde_json::to_value(&definition).unwrap_or_default(),
        )
        .to_agent(chosen_id)
        .with_priority(definition.priority);

        if !self.bus.publish(&msg).await {
            // Publish failed: revert to queued, no state change otherwise.
            warn!(%task_id, "assignment publish failed, remains queued");
            return;
        }

        let mut state = self.state.write().await;
        if let Some(q) = state.queues.get_mut(&definition.priority) {
            q.retain(|id| *id != task_id);
        }
        if let Some(exec) = state.executions.get_mut(&task_id) {
            exec.assign(chosen_id);
        }
        state
            .agent_performance
            .entry(chosen_id)
            .or_insert_with(|| AgentPerformance::new(chosen.workload.max_concurrent))
            .workload
            .selection_count += 1;
        drop(state);

        self.agent_manager.adjust_task_count(chosen_id, 1).await;
    }

    async fn timeout_sweep(&self) {
        let now = Utc::now();
        let mut timed_out = Vec::new();
        {
            let state = self.state.read().await;
            for (id, exec) in &state.executions {
                if exec.has_timed_out(now) {
                    timed_out.push(*id);
                }
            }
        }

        for task_id in timed_out {
            let (agent_id, should_retry, priority) = {
                let mut state = self.state.write().await;
                let Some(exec) = state.executions.get_mut(&task_id) else { continue };
                let agent_id = exec.assigned_agent;
                exec.time_out();
                let should_retry = exec.has_retry_budget();
                if should_retry {
                    exec.retry();
                }
                let priority = exec.priority();
                if should_retry {
                    if let Some(q) = state.queues.get_mut(&priority) {
                        q.push_back(task_id);
                    }
                }
                (agent_id, should_retry, priority)
            };
            let _ = priority;
            if let Some(agent_id) = agent_id {
                self.agent_manager.adjust_task_count(agent_id, -1).await;
                self.record_performance(agent_id, false, 0).await;
            }
            if !should_retry {
                info!(%task_id, "terminal timeout, retry budget exhausted");
            }
        }
    }

    /// Returns `assigned` executions stuck past the assignment grace
    /// period back to `queued` (§4.4 "Stuck-task sweep").
    async fn stuck_task_sweep(&self) {
        let now = Utc::now();
        let grace = chrono::Duration::seconds(self.config.stuck_task_grace_seconds);
        let mut requeued = Vec::new();
        {
            let state = self.state.read().await;
            for (id, exec) in &state.executions {
                if exec.is_stuck_assigned(now, grace) {
                    requeued.push(*id);
                }
            }
        }
        for task_id in requeued {
            let mut state = self.state.write().await;
            let Some(exec) = state.executions.get_mut(&task_id) else { continue };
            let agent_id = exec.assigned_agent;
            let priority = exec.priority();
            exec.requeue();
            if let Some(q) = state.queues.get_mut(&priority) {
                q.push_back(task_id);
            }
            drop(state);
            if let Some(agent_id) = agent_id {
                self.agent_manager.adjust_task_count(agent_id, -1).await;
            }
            warn!(%task_id, "stuck assignment returned to queue");
        }
    }

    /// Handles one `task_result` message from the broadcast channel
    /// (§4.4 "Result ingestion").
    #[instrument(skip(self, result))]
    pub async fn ingest_result(&self, result: TaskResult) {
        let mut state = self.state.write().await;
        let Some(exec) = state.executions.get_mut(&result.task_id) else {
            warn!(task_id = %result.task_id, "result for unknown task, discarding");
            return;
        };
        if exec.status.is_terminal() {
            return;
        }

        let execution_time_ms = exec.execution_time_ms().unwrap_or(0);
        let mut requeue_priority = None;
        if result.success {
            exec.complete(result.payload.clone());
        } else if exec.has_retry_budget() {
            exec.retry();
            requeue_priority = Some(exec.priority());
        } else {
            exec.fail("agent reported failure, retry budget exhausted");
        }
        let agent_id = result.agent_id;
        drop(state);

        if let Some(priority) = requeue_priority {
            let mut state = self.state.write().await;
            state.queues.get_mut(&priority).expect("priority queues pre-populated").push_back(result.task_id);
            let mut recent = state.recent_completions.clone();
            recent.push_back(Utc::now());
            state.recent_completions = recent;
        } else {
            let mut state = self.state.write().await;
            state.recent_completions.push_back(Utc::now());
            while state.recent_completions.len() > 1_000 {
                state.recent_completions.pop_front();
            }
        }

        self.agent_manager.adjust_task_count(agent_id, -1).await;
        self.record_performance(agent_id, result.success, execution_time_ms).await;
    }

    async fn record_performance(&self, agent_id: Uuid, success: bool, execution_time_ms: u64) {
        let mut state = self.state.write().await;
        let perf = state
            .agent_performance
            .entry(agent_id)
            .or_insert_with(|| AgentPerformance::new(self.config.max_concurrent_tasks_per_agent));
        perf.record(crate::domain::models::task::PerformanceSample {
            success,
            execution_time_ms,
            timestamp: Utc::now(),
        });
    }

    async fn recompute_metrics(&self) {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let queue_times: Vec<i64> = state
            .executions
            .values()
            .filter_map(|e| e.assigned_at.zip(e.queued_at).map(|(a, q)| (a - q).num_milliseconds()))
            .collect();
        let avg_queue_time_ms = if queue_times.is_empty() {
            0.0
        } else {
            queue_times.iter().sum::<i64>() as f64 / queue_times.len() as f64
        };

        let exec_times: Vec<u64> = state.executions.values().filter_map(TaskExecution::execution_time_ms).collect();
        let avg_execution_time_ms = if exec_times.is_empty() {
            0.0
        } else {
            exec_times.iter().sum::<u64>() as f64 / exec_times.len() as f64
        };

        while state.recent_completions.front().is_some_and(|t| now - *t > chrono::Duration::minutes(1)) {
            state.recent_completions.pop_front();
        }
        let throughput_per_min = state.recent_completions.len() as f64;

        let mut queue_depths = HashMap::new();
        for p in Priority::DESCENDING {
            queue_depths.insert(p, state.queues.get(&p).map_or(0, std::collections::VecDeque::len));
        }

        state.metrics = OrchestratorMetrics { avg_queue_time_ms, avg_execution_time_ms, throughput_per_min, queue_depths };
    }

    /// §4.4 "Recommendation emission": queue-depth and utilization-
    /// variance based recommendations, bounded to the last hour.
    async fn emit_recommendations(&self) {
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.recommendations.retain(|r| now - r.created_at < chrono::Duration::hours(1));

        let total_depth: usize = state.metrics.queue_depths.values().sum();
        if total_depth > self.config.queue_size_threshold {
            state.recommendations.push(OptimizationRecommendation {
                id: Uuid::new_v4(),
                source_agent: Uuid::nil(),
                recommendation_type: RecommendationType::Performance,
                severity: Severity::Medium,
                title: "queue depth exceeds threshold".to_string(),
                description: format!("total queued tasks {total_depth} exceeds threshold {}", self.config.queue_size_threshold),
                target_files: vec![],
                proposed_changes: vec![],
                expected_benefits: vec!["reduced queue latency".to_string()],
                risk_assessment: "low".to_string(),
                required_validations: vec![],
                confidence: 0.6,
                dependencies: vec![],
                created_at: now,
            });
        }

        let performances: Vec<f64> = state.agent_performance.values().map(|p| p.workload.current_tasks as f64 / p.workload.max_concurrent.max(1) as f64).collect();
        if performances.len() > 1 {
            let mean = performances.iter().sum::<f64>() / performances.len() as f64;
            let variance = performances.iter().map(|u| (u - mean).powi(2)).sum::<f64>() / performances.len() as f64;
            if variance > 0.15 {
                state.recommendations.push(OptimizationRecommendation {
                    id: Uuid::new_v4(),
                    source_agent: Uuid::nil(),
                    recommendation_type: RecommendationType::Performance,
                    severity: Severity::Low,
                    title: "uneven agent utilization".to_string(),
                    description: format!("utilization variance {variance:.3} exceeds threshold"),
                    target_files: vec![],
                    proposed_changes: vec![],
                    expected_benefits: vec!["balanced load".to_string()],
                    risk_assessment: "low".to_string(),
                    required_validations: vec![],
                    confidence: 0.5,
                    dependencies: vec![],
                    created_at: now,
                });
            }
        }
    }

    pub async fn execution(&self, task_id: Uuid) -> Option<TaskExecution> {
        self.state.read().await.executions.get(&task_id).cloned()
    }

    pub async fn metrics(&self) -> OrchestratorMetrics {
        self.state.read().await.metrics.clone()
    }

    pub async fn recommendations(&self) -> Vec<OptimizationRecommendation> {
        self.state.read().await.recommendations.clone()
    }

    pub async fn queue_depth(&self, priority: Priority) -> usize {
        self.state.read().await.queues.get(&priority).map_or(0, std::collections::VecDeque::len)
    }
}

/// Classifies orchestrator-level errors that should never abort a
/// caller's loop — invariant violations are logged and discarded (§7).
pub fn log_invariant_violation(context: &str, err: &CoordinatorError) {
    warn!(context, error = %err, "invariant violation recovered");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::AgentTypeFilter;
    use crate::services::agent_manager::{AgentManagerConfig, DeploymentStrategy};
    use crate::services::bus::InMemoryStore;
    use crate::services::resilience::CircuitBreaker;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoopRuntime;
    #[async_trait]
    impl crate::domain::ports::container_runtime::ContainerRuntime for NoopRuntime {
        async fn create(&self, _spec: crate::domain::ports::container_runtime::CreateSpec) -> CoordinatorResult<crate::domain::models::agent::ContainerHandle> {
            Ok(crate::domain::models::agent::ContainerHandle(uuid::Uuid::new_v4().to_string()))
        }
        async fn stop(&self, _h: &crate::domain::models::agent::ContainerHandle, _g: Duration) -> CoordinatorResult<()> {
            Ok(())
        }
        async fn kill(&self, _h: &crate::domain::models::agent::ContainerHandle) -> CoordinatorResult<()> {
            Ok(())
        }
        async fn inspect(&self, _h: &crate::domain::models::agent::ContainerHandle) -> CoordinatorResult<crate::domain::ports::container_runtime::Inspection> {
            Ok(crate::domain::ports::container_runtime::Inspection {
                status: crate::domain::ports::container_runtime::RuntimeStatus::Running,
                health: Some(crate::domain::models::agent::HealthResult::Healthy),
            })
        }
    }
    struct NoopRegistry;
    #[async_trait]
    impl crate::domain::ports::service_registry::ServiceRegistry for NoopRegistry {
        async fn register(&self, _s: &str, _id: Uuid, _a: &str, _p: u16, _t: Vec<String>, _c: Option<crate::domain::ports::service_registry::HealthCheck>) -> CoordinatorResult<()> {
            Ok(())
        }
        async fn deregister(&self, _id: Uuid) -> CoordinatorResult<()> {
            Ok(())
        }
        async fn list_healthy(&self, _s: &str) -> CoordinatorResult<Vec<crate::domain::ports::service_registry::RegistryEntry>> {
            Ok(vec![])
        }
    }

    async fn test_orchestrator() -> (TaskOrchestrator, Arc<AgentManager>) {
        let bus = Arc::new(MessageBus::new(Arc::new(InMemoryStore::new()), "swarm", 16));
        let agent_manager = Arc::new(AgentManager::new(
            Arc::new(NoopRuntime),
            Arc::new(NoopRegistry),
            Arc::new(CircuitBreaker::new("runtime", crate::domain::models::config::CircuitBreakerConfig::default())),
            AgentManagerConfig {
                bus_address: "memory://local".into(),
                store_address: "sqlite://test".into(),
                log_level: "info".into(),
                health_check_interval: Duration::from_secs(15),
                scaling_check_interval: Duration::from_secs(30),
                scale_up_threshold: 0.8,
                scale_down_threshold: 0.2,
                max_per_type: 5,
                min_per_type: 1,
                max_restart_attempts: 3,
                stop_grace: Duration::from_secs(10),
            },
        ));
        let spec = crate::domain::models::agent::AgentSpec::new("scraper", AgentType::Scraping, "img:latest");
        let spec_id = spec.id;
        agent_manager.register_spec(spec).await;
        agent_manager.deploy(spec_id, 1, DeploymentStrategy::Direct).await.unwrap();

        let orchestrator = TaskOrchestrator::new(bus, agent_manager.clone(), SchedulingConfig::default());
        (orchestrator, agent_manager)
    }

    #[tokio::test]
    async fn cancel_of_terminal_task_is_noop() {
        let (orchestrator, _mgr) = test_orchestrator().await;
        let def = TaskDefinition::new("scrape", AgentTypeFilter::Exact("scraping".into()));
        let id = orchestrator.submit(def).await.unwrap();
        orchestrator.scheduling_tick().await;
        orchestrator
            .ingest_result(TaskResult {
                task_id: id,
                agent_id: Uuid::new_v4(),
                payload: serde_json::json!({"ok": true}),
                success: true,
                recorded_at: Utc::now(),
            })
            .await;
        assert!(!orchestrator.cancel(id, "late").await);
    }

    #[tokio::test]
    async fn empty_candidate_set_leaves_task_queued() {
        let bus = Arc::new(MessageBus::new(Arc::new(InMemoryStore::new()), "swarm", 16));
        let agent_manager = Arc::new(AgentManager::new(
            Arc::new(NoopRuntime),
            Arc::new(NoopRegistry),
            Arc::new(CircuitBreaker::new("runtime", crate::domain::models::config::CircuitBreakerConfig::default())),
            AgentManagerConfig {
                bus_address: "memory://local".into(),
                store_address: "sqlite://test".into(),
                log_level: "info".into(),
                health_check_interval: Duration::from_secs(15),
                scaling_check_interval: Duration::from_secs(30),
                scale_up_threshold: 0.8,
                scale_down_threshold: 0.2,
                max_per_type: 5,
                min_per_type: 1,
                max_restart_attempts: 3,
                stop_grace: Duration::from_secs(10),
            },
        ));
        let orchestrator = TaskOrchestrator::new(bus, agent_manager, SchedulingConfig::default());
        let def = TaskDefinition::new("scrape", AgentTypeFilter::Exact("scraping".into()));
        let id = orchestrator.submit(def).await.unwrap();
        orchestrator.scheduling_tick().await;
        let exec = orchestrator.execution(id).await.unwrap();
        assert_eq!(exec.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn retry_then_success_reaches_completed_with_expected_retry_count() {
        let (orchestrator, _mgr) = test_orchestrator().await;
        let def = TaskDefinition::new("scrape", AgentTypeFilter::Exact("scraping".into())).with_retries(2).with_timeout(60);
        let id = orchestrator.submit(def).await.unwrap();

        for _ in 0..2 {
            orchestrator.scheduling_tick().await;
            let exec = orchestrator.execution(id).await.unwrap();
            let agent_id = exec.assigned_agent.unwrap();
            orchestrator
                .ingest_result(TaskResult {
                    task_id: id,
                    agent_id,
                    payload: serde_json::Value::Null,
                    success: false,
                    recorded_at: Utc::now(),
                })
                .await;
        }

        orchestrator.scheduling_tick().await;
        let exec = orchestrator.execution(id).await.unwrap();
        let agent_id = exec.assigned_agent.unwrap();
        orchestrator
            .ingest_result(TaskResult {
                task_id: id,
                agent_id,
                payload: serde_json::json!({"ok": true}),
                success: true,
                recorded_at: Utc::now(),
            })
            .await;

        let final_exec = orchestrator.execution(id).await.unwrap();
        assert_eq!(final_exec.status, TaskStatus::Completed);
        assert_eq!(final_exec.retry_count, 2);
        assert_eq!(final_exec.result, Some(serde_json::json!({"ok": true})));
    }
}
