//! Port for the opaque "instance launcher" (§6 "Container runtime").

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::models::agent::{AgentType, ContainerHandle, HealthCheckDescriptor, HealthResult};
use crate::error::CoordinatorResult;

#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<String>,
    pub cpu_limit_millis: u32,
    pub memory_limit_mb: u32,
    pub labels: BTreeMap<String, String>,
    pub network: Option<String>,
    pub exposed_ports: Vec<u16>,
    pub health_check: Option<HealthCheckDescriptor>,
    pub agent_type: AgentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Running,
    NotRunning,
    Missing,
}

#[derive(Debug, Clone)]
pub struct Inspection {
    pub status: RuntimeStatus,
    pub health: Option<HealthResult>,
}

/// Treated as opaque per §1 Scope: the kernel never interprets the image
/// registry, the network driver, or the handle's internal shape.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: CreateSpec) -> CoordinatorResult<ContainerHandle>;

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> CoordinatorResult<()>;

    async fn kill(&self, handle: &ContainerHandle) -> CoordinatorResult<()>;

    async fn inspect(&self, handle: &ContainerHandle) -> CoordinatorResult<Inspection>;
}
