//! Port for the service-discovery registry (§6 "Service registry").

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoordinatorResult;

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub interval_seconds: u64,
    pub deregister_after_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: Uuid,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(
        &self,
        service: &str,
        id: Uuid,
        address: &str,
        port: u16,
        tags: Vec<String>,
        check: Option<HealthCheck>,
    ) -> CoordinatorResult<()>;

    async fn deregister(&self, id: Uuid) -> CoordinatorResult<()>;

    async fn list_healthy(&self, service: &str) -> CoordinatorResult<Vec<RegistryEntry>>;
}
