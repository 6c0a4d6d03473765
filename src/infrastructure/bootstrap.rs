//! Supervising bootstrapper: brings C1-C6 up in dependency order and
//! tears them down in reverse on shutdown (§2, §5 "Cancellation").

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::models::config::Config;
use crate::domain::ports::{ContainerRuntime, MessageStore, ServiceRegistry};
use crate::services::agent_manager::{AgentManager, AgentManagerConfig};
use crate::services::bus::MessageBus;
use crate::services::coordination::{CoordinationService, CoordinationServiceConfig};
use crate::services::optimization::OptimizationEngine;
use crate::services::orchestrator::TaskOrchestrator;
use crate::services::resilience::CircuitBreaker;

/// The fully wired runtime: every C1-C6 component plus the background
/// tasks that drive their periodic sweeps.
pub struct Supervisor {
    pub bus: Arc<MessageBus>,
    pub agent_manager: Arc<AgentManager>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub coordination: Arc<CoordinationService>,
    pub optimization: Arc<OptimizationEngine>,
    shutdown_tx: watch::Sender<bool>,
    background_tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Wires every component in dependency order: message store -> bus
    /// -> agent manager -> orchestrator -> coordination service ->
    /// optimization engine (§2 "Components").
    pub fn bootstrap(
        config: &Config,
        message_store: Arc<dyn MessageStore>,
        container_runtime: Arc<dyn ContainerRuntime>,
        service_registry: Arc<dyn ServiceRegistry>,
        backup_dir: std::path::PathBuf,
    ) -> Self {
        let bus = Arc::new(MessageBus::new(message_store, "swarm", 64));

        let runtime_breaker = Arc::new(CircuitBreaker::new("container_runtime", config.circuit_breaker.clone()));
        let agent_manager = Arc::new(AgentManager::new(
            container_runtime,
            service_registry,
            runtime_breaker,
            AgentManagerConfig {
                bus_address: config.bus_address.clone(),
                store_address: config.bus_address.clone(),
                log_level: config.logging.level.clone(),
                health_check_interval: Duration::from_secs(config.scheduling.health_check_interval_seconds),
                scaling_check_interval: Duration::from_secs(config.scheduling.scaling_check_interval_seconds),
                scale_up_threshold: config.scheduling.scale_up_threshold,
                scale_down_threshold: config.scheduling.scale_down_threshold,
                max_per_type: config.scheduling.max_agents_per_type,
                min_per_type: config.scheduling.min_agents_per_type,
                max_restart_attempts: 5,
                stop_grace: Duration::from_secs(10),
            },
        ));

        let orchestrator = Arc::new(TaskOrchestrator::new(bus.clone(), agent_manager.clone(), config.scheduling.clone()));

        let coordination = Arc::new(CoordinationService::new(
            bus.clone(),
            CoordinationServiceConfig { resource_lock_timeout_seconds: config.scheduling.resource_lock_timeout_seconds },
        ));

        let optimization = Arc::new(OptimizationEngine::new(config.optimization.clone(), backup_dir));

        let (shutdown_tx, _) = watch::channel(false);

        Self { bus, agent_manager, orchestrator, coordination, optimization, shutdown_tx, background_tasks: Vec::new() }
    }

    /// Spawns the periodic sweeps each component documents (health
    /// checks, auto-scaling, scheduling tick, lock sweep, timeout sweep).
    /// Each loop exits as soon as the shutdown signal fires.
    pub fn spawn_background_loops(&mut self) {
        self.background_tasks.push(self.spawn_loop("agent_manager.health", Duration::from_secs(5), {
            let manager = self.agent_manager.clone();
            move || {
                let manager = manager.clone();
                async move {
                    manager.health_tick().await;
                }
            }
        }));

        self.background_tasks.push(self.spawn_loop("agent_manager.autoscale", Duration::from_secs(15), {
            let manager = self.agent_manager.clone();
            move || {
                let manager = manager.clone();
                async move {
                    manager.auto_scale_tick().await;
                }
            }
        }));

        self.background_tasks.push(self.spawn_loop("orchestrator.scheduling", Duration::from_secs(1), {
            let orchestrator = self.orchestrator.clone();
            move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.scheduling_tick().await;
                }
            }
        }));

        self.background_tasks.push(self.spawn_loop("coordination.lock_sweep", Duration::from_secs(60), {
            let coordination = self.coordination.clone();
            move || {
                let coordination = coordination.clone();
                async move {
                    coordination.lock_sweep_tick().await;
                }
            }
        }));

        self.background_tasks.push(self.spawn_loop("optimization.timeout_sweep", Duration::from_secs(30), {
            let optimization = self.optimization.clone();
            move || {
                let optimization = optimization.clone();
                async move {
                    optimization.timeout_sweep().await;
                }
            }
        }));
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    _ = shutdown.changed() => {
                        info!(loop_name = name, "background loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Signals every background loop to stop and waits up to `grace` for
    /// them to exit (§5 "Cancellation": bounded grace period).
    pub async fn shutdown(mut self, grace: Duration) {
        info!("supervisor shutdown requested");
        let _ = self.shutdown_tx.send(true);

        let joined = tokio::time::timeout(grace, futures::future::join_all(self.background_tasks.drain(..))).await;
        if joined.is_err() {
            warn!("background loops did not exit within grace period");
        }
        let _ = self.bus.cleanup_expired_tasks().await;
    }
}
