//! Agent Manager (C3, §4.3): deployment lifecycle, health loop, and
//! auto-scaling over an opaque container runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::agent::{
    AgentInstance, AgentSpec, AgentType, HealthCheckDescriptor, HealthResult, InstanceStatus,
};
#[cfg(test)]
use crate::domain::models::agent::ContainerHandle;
use crate::domain::ports::container_runtime::{ContainerRuntime, CreateSpec, RuntimeStatus};
use crate::domain::ports::service_registry::ServiceRegistry;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::services::resilience::CircuitBreaker;

/// Launch/replacement strategy for `deploy` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStrategy {
    Rolling,
    BlueGreen,
    Direct,
}

/// Return shape of `deploy()` (SPEC_FULL supplement from
/// `agent_manager.py`'s `DeploymentResult`).
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    pub strategy: DeploymentStrategy,
    pub succeeded: Vec<Uuid>,
    pub failed: usize,
    pub elapsed: Duration,
}

struct State {
    specs: HashMap<Uuid, AgentSpec>,
    instances: HashMap<Uuid, AgentInstance>,
}

pub struct AgentManagerConfig {
    pub bus_address: String,
    pub store_address: String,
    pub log_level: String,
    pub health_check_interval: Duration,
    pub scaling_check_interval: Duration,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub max_per_type: u32,
    pub min_per_type: u32,
    pub max_restart_attempts: u32,
    pub stop_grace: Duration,
}

pub struct AgentManager {
    state: RwLock<State>,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn ServiceRegistry>,
    runtime_breaker: Arc<CircuitBreaker>,
    config: AgentManagerConfig,
    /// Serializes scale operations per agent type (§4.3 "Scale operations
    /// are serialized per type").
    scale_locks: Mutex<HashMap<AgentType, Arc<Mutex<()>>>>,
    /// Reused across HTTP health probes rather than built per-call.
    http_client: reqwest::Client,
}

impl AgentManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn ServiceRegistry>,
        runtime_breaker: Arc<CircuitBreaker>,
        config: AgentManagerConfig,
    ) -> Self {
        Self {
            state: RwLock::new(State { specs: HashMap::new(), instances: HashMap::new() }),
            runtime,
            registry,
            runtime_breaker,
            config,
            scale_locks: Mutex::new(HashMap::new()),
            http_client: reqwest::Client::new(),
        }
    }

    pub async fn register_spec(&self, spec: AgentSpec) {
        self.state.write().await.specs.insert(spec.id, spec);
    }

    pub async fn instance(&self, id: Uuid) -> Option<AgentInstance> {
        self.state.read().await.instances.get(&id).cloned()
    }

    pub async fn compatible_healthy_instances(&self, agent_type: AgentType) -> Vec<AgentInstance> {
        self.state
            .read()
            .await
            .instances
            .values()
            .filter(|i| i.agent_type == agent_type && i.status.is_eligible_for_work() && i.has_capacity())
            .cloned()
            .collect()
    }

    async fn launch_one(&self, spec: &AgentSpec, max_concurrent: u32) -> CoordinatorResult<AgentInstance> {
        let instance_id = Uuid::new_v4();
        let env = spec.launch_environment(
            instance_id,
            &self.config.bus_address,
            &self.config.store_address,
            &self.config.log_level,
        );
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("swarmkeeper.agent_type".to_string(), spec.agent_type.as_str().to_string());
        labels.insert("swarmkeeper.spec_id".to_string(), spec.id.to_string());

        let create = CreateSpec {
            image: spec.container_image.clone(),
            env: env.into_iter().collect(),
            mounts: spec.volume_mounts.clone(),
            cpu_limit_millis: spec.cpu_limit_millis,
            memory_limit_mb: spec.memory_limit_mb,
            labels,
            network: None,
            exposed_ports: spec.exposed_ports.clone(),
            health_check: spec.health_check.clone(),
            agent_type: spec.agent_type,
        };

        let runtime = self.runtime.clone();
        let handle = self
            .runtime_breaker
            .call(CoordinatorError::is_retryable, || {
                let runtime = runtime.clone();
                let create = create.clone();
                async move { runtime.create(create).await }
            })
            .await
            .map_err(|e| match e {
                crate::services::resilience::CircuitBreakerError::Open => CoordinatorError::CircuitOpen {
                    breaker: self.runtime_breaker.name().to_string(),
                },
                crate::services::resilience::CircuitBreakerError::Timeout => {
                    CoordinatorError::Timeout { elapsed_ms: 30_000 }
                }
                crate::services::resilience::CircuitBreakerError::Inner(inner) => inner,
            })?;

        let mut instance = AgentInstance::launch(spec, handle, max_concurrent);
        instance.status = InstanceStatus::Starting;

        self.registry
            .register(
                spec.agent_type.as_str(),
                instance.id,
                &instance_id.to_string(),
                0,
                vec![spec.agent_type.as_str().to_string()],
                None,
            )
            .await?;

        self.state.write().await.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    /// Deploys `replicas` instances of `spec_id` using `strategy`
    /// (§4.3). Launch failures are logged and non-fatal to the batch.
    #[instrument(skip(self))]
    pub async fn deploy(&self, spec_id: Uuid, replicas: u32, strategy: DeploymentStrategy) -> CoordinatorResult<DeploymentOutcome> {
        let started = std::time::Instant::now();
        let spec = self
            .state
            .read()
            .await
            .specs
            .get(&spec_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::not_found("agent_spec", spec_id))?;

        let old_instances: Vec<Uuid> = self
            .state
            .read()
            .await
            .instances
            .values()
            .filter(|i| i.spec_id == spec_id && !i.status.is_terminal())
            .map(|i| i.id)
            .collect();

        let mut succeeded = Vec::new();
        let mut failed = 0usize;

        match strategy {
            DeploymentStrategy::Direct => {
                for id in &old_instances {
                    let _ = self.stop(*id, false).await;
                }
                for _ in 0..replicas {
                    match self.launch_one(&spec, self.config.max_per_type.max(1)).await {
                        Ok(inst) => succeeded.push(inst.id),
                        Err(err) => {
                            warn!(error = %err, "direct deploy launch failed");
                            failed += 1;
                        }
                    }
                }
            }
            DeploymentStrategy::Rolling => {
                for old_id in &old_instances {
                    match self.launch_one(&spec, self.config.max_per_type.max(1)).await {
                        Ok(new_inst) => {
                            self.wait_until_healthy(new_inst.id, Duration::from_secs(30)).await;
                            succeeded.push(new_inst.id);
                            let _ = self.stop(*old_id, false).await;
                        }
                        Err(err) => {
                            warn!(error = %err, "rolling deploy launch failed, keeping old instance");
                            failed += 1;
                        }
                    }
                }
                let already = old_instances.len() as u32;
                for _ in already..replicas {
                    match self.launch_one(&spec, self.config.max_per_type.max(1)).await {
                        Ok(inst) => succeeded.push(inst.id),
                        Err(_) => failed += 1,
                    }
                }
            }
            DeploymentStrategy::BlueGreen => {
                let mut launched = Vec::new();
                let mut abort = false;
                for _ in 0..replicas {
                    match self.launch_one(&spec, self.config.max_per_type.max(1)).await {
                        Ok(inst) => launched.push(inst.id),
                        Err(err) => {
                            warn!(error = %err, "blue/green launch failed, reverting new instances");
                            abort = true;
                            break;
                        }
                    }
                }
                if abort {
                    for id in &launched {
                        let _ = self.stop(*id, true).await;
                    }
                    failed = replicas as usize;
                } else {
                    for id in &launched {
                        self.wait_until_healthy(*id, Duration::from_secs(30)).await;
                    }
                    for old_id in &old_instances {
                        let _ = self.stop(*old_id, false).await;
                    }
                    succeeded = launched;
                }
            }
        }

        info!(spec_id = %spec_id, ?strategy, succeeded = succeeded.len(), failed, "deploy complete");
        Ok(DeploymentOutcome { strategy, succeeded, failed, elapsed: started.elapsed() })
    }

    async fn wait_until_healthy(&self, instance_id: Uuid, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(inst) = self.instance(instance_id).await {
                if inst.status == InstanceStatus::Healthy {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Graceful stop with a timeout, then deregister (§4.3 `stop`).
    #[instrument(skip(self))]
    pub async fn stop(&self, instance_id: Uuid, force: bool) -> CoordinatorResult<()> {
        let handle = {
            let state = self.state.read().await;
            state
                .instances
                .get(&instance_id)
                .map(|i| i.handle.clone())
                .ok_or_else(|| CoordinatorError::not_found("agent_instance", instance_id))?
        };

        if force {
            self.runtime.kill(&handle).await?;
        } else {
            self.runtime.stop(&handle, self.config.stop_grace).await?;
        }
        self.registry.deregister(instance_id).await?;

        let mut state = self.state.write().await;
        if let Some(inst) = state.instances.get_mut(&instance_id) {
            inst.status = InstanceStatus::Stopped;
        }
        Ok(())
    }

    /// Stop + fresh launch; bumps `restart_count`, transitioning to
    /// `failed` past `max_restart_attempts` (§4.3 `restart`).
    #[instrument(skip(self))]
    pub async fn restart(&self, instance_id: Uuid) -> CoordinatorResult<()> {
        let (spec_id, restart_count, max_concurrent) = {
            let state = self.state.read().await;
            let inst = state.instances.get(&instance_id).ok_or_else(|| CoordinatorError::not_found("agent_instance", instance_id))?;
            (inst.spec_id, inst.restart_count, inst.max_concurrent)
        };

        if restart_count >= self.config.max_restart_attempts {
            let mut state = self.state.write().await;
            if let Some(inst) = state.instances.get_mut(&instance_id) {
                inst.status = InstanceStatus::Failed;
            }
            warn!(%instance_id, restart_count, "max restart attempts exceeded, marking failed");
            return Ok(());
        }

        self.stop(instance_id, false).await?;

        let spec = self
            .state
            .read()
            .await
            .specs
            .get(&spec_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::not_found("agent_spec", spec_id))?;

        let new_instance = self.launch_one(&spec, max_concurrent).await?;
        let mut state = self.state.write().await;
        if let Some(inst) = state.instances.get_mut(&new_instance.id) {
            inst.restart_count = restart_count + 1;
        }
        Ok(())
    }

    /// Adjusts live healthy instances of `agent_type` toward `target`;
    /// on scale-down, prefers the least-utilized instance (§4.3 `scale`).
    /// Serialized per type.
    pub async fn scale(&self, agent_type: AgentType, target: u32) -> CoordinatorResult<()> {
        let lock = {
            let mut locks = self.scale_locks.lock().await;
            locks.entry(agent_type).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock().await;

        let current: Vec<AgentInstance> = self
            .state
            .read()
            .await
            .instances
            .values()
            .filter(|i| i.agent_type == agent_type && !i.status.is_terminal())
            .cloned()
            .collect();

        let spec = self
            .state
            .read()
            .await
            .specs
            .values()
            .find(|s| s.agent_type == agent_type)
            .cloned()
            .ok_or_else(|| CoordinatorError::Configuration(format!("no agent spec registered for type {}", agent_type.as_str())))?;

        if (current.len() as u32) < target {
            for _ in current.len() as u32..target {
                if let Err(err) = self.launch_one(&spec, self.config.max_per_type.max(1)).await {
                    warn!(error = %err, "scale-up launch failed");
                }
            }
        } else if (current.len() as u32) > target {
            let mut sorted = current;
            sorted.sort_by(|a, b| a.utilization().partial_cmp(&b.utilization()).unwrap_or(std::cmp::Ordering::Equal));
            let excess = sorted.len() as u32 - target;
            for inst in sorted.into_iter().take(excess as usize) {
                let _ = self.stop(inst.id, false).await;
            }
        }
        Ok(())
    }

    /// Selects a compatible healthy instance; actual scoring is
    /// delegated to the load balancer by the orchestrator, which calls
    /// [`Self::compatible_healthy_instances`] directly. This convenience
    /// wrapper implements the simple "first available" contract §4.3
    /// names for direct manager callers.
    pub async fn assign_task(&self, agent_type: AgentType) -> Option<Uuid> {
        self.compatible_healthy_instances(agent_type).await.first().map(|i| i.id)
    }

    /// One iteration of the health loop (§4.3 "Health loop").
    pub async fn health_tick(&self) {
        let ids: Vec<Uuid> = self.state.read().await.instances.keys().copied().collect();
        for id in ids {
            self.probe_one(id).await;
        }
    }

    async fn probe_one(&self, instance_id: Uuid) {
        let (handle, health_check, restart_count) = {
            let state = self.state.read().await;
            let Some(inst) = state.instances.get(&instance_id) else { return };
            if inst.status.is_terminal() {
                return;
            }
            (inst.handle.clone(), inst.health_check.clone(), inst.restart_count)
        };

        let inspection = match self.runtime.inspect(&handle).await {
            Ok(i) => i,
            Err(err) => {
                warn!(error = %err, %instance_id, "inspect failed");
                return;
            }
        };

        if inspection.status == RuntimeStatus::Missing {
            let mut state = self.state.write().await;
            if let Some(inst) = state.instances.get_mut(&instance_id) {
                inst.status = InstanceStatus::Failed;
            }
            return;
        }

        let result = match health_check {
            Some(descriptor) => self.run_health_check(&descriptor).await,
            None => inspection.health.unwrap_or(if inspection.status == RuntimeStatus::Running {
                HealthResult::Healthy
            } else {
                HealthResult::Critical
            }),
        };

        let should_restart = {
            let mut state = self.state.write().await;
            let Some(inst) = state.instances.get_mut(&instance_id) else { return };
            inst.record_health(result);
            result == HealthResult::Critical && restart_count < self.config.max_restart_attempts
        };

        if should_restart {
            if let Err(err) = self.restart(instance_id).await {
                warn!(error = %err, %instance_id, "scheduled restart failed");
            }
        }
    }

    /// Invokes a registered health descriptor and classifies the outcome
    /// (§4.3 "Health loop": HTTP probe, TCP probe, or custom command).
    async fn run_health_check(&self, descriptor: &HealthCheckDescriptor) -> HealthResult {
        match descriptor {
            HealthCheckDescriptor::Http { path, port, timeout_seconds } => {
                let url = format!("http://127.0.0.1:{port}{path}");
                let request = self.http_client.get(&url).timeout(Duration::from_secs(*timeout_seconds)).send().await;
                match request {
                    Ok(resp) if resp.status().is_success() => HealthResult::Healthy,
                    Ok(resp) if resp.status().is_client_error() => HealthResult::Warning,
                    Ok(resp) => {
                        warn!(status = %resp.status(), url, "health check returned server error");
                        HealthResult::Critical
                    }
                    Err(err) => {
                        warn!(error = %err, url, "http health check failed");
                        HealthResult::Critical
                    }
                }
            }
            HealthCheckDescriptor::Tcp { port, timeout_seconds } => {
                let addr = format!("127.0.0.1:{port}");
                match tokio::time::timeout(Duration::from_secs(*timeout_seconds), tokio::net::TcpStream::connect(&addr)).await {
                    Ok(Ok(_)) => HealthResult::Healthy,
                    Ok(Err(err)) => {
                        warn!(error = %err, addr, "tcp health check failed");
                        HealthResult::Critical
                    }
                    Err(_) => {
                        warn!(addr, "tcp health check timed out");
                        HealthResult::Critical
                    }
                }
            }
            HealthCheckDescriptor::Custom { command, timeout_seconds } => {
                let mut parts = command.split_whitespace();
                let Some(program) = parts.next() else {
                    warn!("custom health check command is empty");
                    return HealthResult::Critical;
                };
                let mut cmd = tokio::process::Command::new(program);
                cmd.args(parts);
                match tokio::time::timeout(Duration::from_secs(*timeout_seconds), cmd.status()).await {
                    Ok(Ok(status)) if status.success() => HealthResult::Healthy,
                    Ok(Ok(status)) => {
                        warn!(?status, command, "custom health check exited non-zero");
                        HealthResult::Critical
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, command, "custom health check failed to run");
                        HealthResult::Critical
                    }
                    Err(_) => {
                        warn!(command, "custom health check timed out");
                        HealthResult::Critical
                    }
                }
            }
        }
    }

    /// One iteration of the auto-scaling loop (§4.3 "Auto-scaling loop").
    pub async fn auto_scale_tick(&self) {
        let types: Vec<AgentType> = {
            let state = self.state.read().await;
            state.specs.values().map(|s| s.agent_type).collect()
        };
        for agent_type in types {
            let instances: Vec<AgentInstance> = self
                .state
                .read()
                .await
                .instances
                .values()
                .filter(|i| i.agent_type == agent_type && !i.status.is_terminal())
                .cloned()
                .collect();
            if instances.is_empty() {
                continue;
            }
            let avg_utilization: f64 = instances.iter().map(AgentInstance::utilization).sum::<f64>() / instances.len() as f64;

            if avg_utilization > self.config.scale_up_threshold && (instances.len() as u32) < self.config.max_per_type {
                let _ = self.scale(agent_type, instances.len() as u32 + 1).await;
            } else if avg_utilization < self.config.scale_down_threshold && (instances.len() as u32) > self.config.min_per_type {
                let _ = self.scale(agent_type, instances.len() as u32 - 1).await;
            }
        }
    }

    /// Update after a task assignment/completion so `current_tasks`
    /// stays consistent with invariant I-1. The Orchestrator calls this;
    /// the Agent Manager never derives it independently.
    pub async fn adjust_task_count(&self, instance_id: Uuid, delta: i32) {
        let mut state = self.state.write().await;
        if let Some(inst) = state.instances.get_mut(&instance_id) {
            inst.current_tasks = (inst.current_tasks as i64 + i64::from(delta)).max(0) as u32;
        }
    }

    pub async fn all_instances(&self) -> Vec<AgentInstance> {
        self.state.read().await.instances.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::container_runtime::Inspection;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRuntime {
        created: AtomicUsize,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn create(&self, _spec: CreateSpec) -> CoordinatorResult<ContainerHandle> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(ContainerHandle(format!("c{n}")))
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

    struct FakeRegistry;
    #[async_trait]
    impl ServiceRegistry for FakeRegistry {
        async fn register(&self, _s: &str, _id: Uuid, _a: &str, _p: u16, _t: Vec<String>, _c: Option<crate::domain::ports::service_registry::HealthCheck>) -> CoordinatorResult<()> {
            Ok(())
        }
        async fn deregister(&self, _id: Uuid) -> CoordinatorResult<()> {
            Ok(())
        }
        async fn list_healthy(&self, _service: &str) -> CoordinatorResult<Vec<crate::domain::ports::service_registry::RegistryEntry>> {
            Ok(vec![])
        }
    }

    fn test_config() -> AgentManagerConfig {
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
        }
    }

    fn manager() -> AgentManager {
        let breaker_cfg = crate::domain::models::config::CircuitBreakerConfig::default();
        AgentManager::new(
            Arc::new(FakeRuntime { created: AtomicUsize::new(0) }),
            Arc::new(FakeRegistry),
            Arc::new(CircuitBreaker::new("runtime", breaker_cfg)),
            test_config(),
        )
    }

    #[tokio::test]
    async fn deploy_direct_launches_requested_replicas() {
        let mgr = manager();
        let spec = AgentSpec::new("scraper", AgentType::Scraping, "img:latest");
        let spec_id = spec.id;
        mgr.register_spec(spec).await;

        let outcome = mgr.deploy(spec_id, 3, DeploymentStrategy::Direct).await.unwrap();
        assert_eq!(outcome.succeeded.len(), 3);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn scale_down_prefers_least_utilized() {
        let mgr = manager();
        let spec = AgentSpec::new("scraper", AgentType::Scraping, "img:latest");
        let spec_id = spec.id;
        mgr.register_spec(spec).await;
        mgr.deploy(spec_id, 2, DeploymentStrategy::Direct).await.unwrap();

        let instances = mgr.all_instances().await;
        mgr.adjust_task_count(instances[0].id, 5).await;

        mgr.scale(AgentType::Scraping, 1).await.unwrap();
        let remaining = mgr.all_instances().await;
        let still_alive: Vec<_> = remaining.iter().filter(|i| !i.status.is_terminal()).collect();
        assert_eq!(still_alive.len(), 1);
        assert_eq!(still_alive[0].id, instances[0].id);
    }
}
