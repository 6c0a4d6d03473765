//! End-to-end coverage for the scheduling loop's capacity-aware
//! assignment: a full agent is never selected over an idle one of the
//! same type, regardless of the configured strategy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use swarmkeeper::domain::models::agent::{AgentSpec, AgentType, ContainerHandle, HealthResult};
use swarmkeeper::domain::models::config::SchedulingConfig;
use swarmkeeper::domain::models::task::{AgentTypeFilter, TaskDefinition, TaskStatus};
use swarmkeeper::domain::ports::container_runtime::{ContainerRuntime, CreateSpec, Inspection, RuntimeStatus};
use swarmkeeper::domain::ports::service_registry::{HealthCheck, RegistryEntry, ServiceRegistry};
use swarmkeeper::error::CoordinatorResult;
use swarmkeeper::services::agent_manager::{AgentManager, AgentManagerConfig, DeploymentStrategy};
use swarmkeeper::services::bus::InMemoryStore;
use swarmkeeper::services::bus::MessageBus;
use swarmkeeper::services::orchestrator::TaskOrchestrator;
use swarmkeeper::services::resilience::CircuitBreaker;

struct AlwaysHealthyRuntime;

#[async_trait]
impl ContainerRuntime for AlwaysHealthyRuntime {
    async fn create(&self, _spec: CreateSpec) -> CoordinatorResult<ContainerHandle> {
        Ok(ContainerHandle(Uuid::new_v4().to_string()))
    }
    async fn stop(&self, _handle: &ContainerHandle, _grace: Duration) -> CoordinatorResult<()> {
        Ok(())
    }
    async fn kill(&self, _handle: &ContainerHandle) -> CoordinatorResult<()> {
        Ok(())
    }
    async fn inspect(&self, _handle: &ContainerHandle) -> CoordinatorResult<Inspection> {
        Ok(Inspection { status: RuntimeStatus::Running, health: Some(HealthResult::Healthy) })
    }
}

struct NoopRegistry;

#[async_trait]
impl ServiceRegistry for NoopRegistry {
    async fn register(
        &self,
        _service: &str,
        _instance_id: Uuid,
        _address: &str,
        _port: u16,
        _tags: Vec<String>,
        _check: Option<HealthCheck>,
    ) -> CoordinatorResult<()> {
        Ok(())
    }
    async fn deregister(&self, _instance_id: Uuid) -> CoordinatorResult<()> {
        Ok(())
    }
    async fn list_healthy(&self, _service: &str) -> CoordinatorResult<Vec<RegistryEntry>> {
        Ok(vec![])
    }
}

fn manager_config() -> AgentManagerConfig {
    AgentManagerConfig {
        bus_address: "memory://local".into(),
        store_address: "sqlite://test".into(),
        log_level: "info".into(),
        health_check_interval: Duration::from_secs(15),
        scaling_check_interval: Duration::from_secs(30),
        scale_up_threshold: 0.8,
        scale_down_threshold: 0.2,
        max_per_type: 3,
        min_per_type: 1,
        max_restart_attempts: 3,
        stop_grace: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn five_tasks_all_go_to_the_idle_agent_when_the_other_is_at_capacity() {
    let agent_manager = Arc::new(AgentManager::new(
        Arc::new(AlwaysHealthyRuntime),
        Arc::new(NoopRegistry),
        Arc::new(CircuitBreaker::new("runtime", swarmkeeper::domain::models::config::CircuitBreakerConfig::default())),
        manager_config(),
    ));

    let spec = AgentSpec::new("scraper", AgentType::Scraping, "img:latest");
    let spec_id = spec.id;
    agent_manager.register_spec(spec).await;
    agent_manager.deploy(spec_id, 2, DeploymentStrategy::Direct).await.unwrap();

    // Launches start `pending`; one health tick against the
    // always-healthy runtime promotes both to `healthy` so they're
    // eligible for assignment.
    agent_manager.health_tick().await;

    let instances = agent_manager.all_instances().await;
    assert_eq!(instances.len(), 2);
    let full_agent = instances[0].id;
    let idle_agent = instances[1].id;
    agent_manager.adjust_task_count(full_agent, 3).await;

    let bus = Arc::new(MessageBus::new(Arc::new(InMemoryStore::new()), "swarm", 64));

    for strategy in ["round_robin", "least_loaded", "performance_based", "adaptive"] {
        let mut config = SchedulingConfig::default();
        config.scheduling_strategy = strategy.to_string();
        let orchestrator = TaskOrchestrator::new(bus.clone(), agent_manager.clone(), config);

        let mut task_ids = Vec::new();
        for _ in 0..5 {
            let def = TaskDefinition::new("scrape", AgentTypeFilter::Exact("scraping".into()));
            task_ids.push(orchestrator.submit(def).await.unwrap());
        }

        orchestrator.scheduling_tick().await;

        for task_id in &task_ids {
            let exec = orchestrator.execution(*task_id).await.unwrap();
            assert_eq!(exec.status, TaskStatus::Assigned, "strategy {strategy} left a task unassigned");
            assert_eq!(exec.assigned_agent, Some(idle_agent), "strategy {strategy} assigned a task to the full agent");
        }

        // Undo each assignment's task-count bump so the next strategy's
        // iteration sees the same starting capacities.
        for _ in &task_ids {
            agent_manager.adjust_task_count(idle_agent, -1).await;
        }
    }
}
