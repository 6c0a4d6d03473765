//! In-memory [`ServiceRegistry`] for local/dev deployments, mirroring the
//! role [`crate::services::bus::InMemoryStore`] plays for the message
//! store: no external discovery dependency, full port semantics.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::ports::service_registry::{HealthCheck, RegistryEntry, ServiceRegistry};
use crate::error::CoordinatorResult;

struct Entry {
    service: String,
    entry: RegistryEntry,
    _check: Option<HealthCheck>,
}

#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn register(
        &self,
        service: &str,
        id: Uuid,
        address: &str,
        port: u16,
        tags: Vec<String>,
        check: Option<HealthCheck>,
    ) -> CoordinatorResult<()> {
        self.entries.write().await.insert(
            id,
            Entry {
                service: service.to_string(),
                entry: RegistryEntry { id, address: address.to_string(), port, tags },
                _check: check,
            },
        );
        Ok(())
    }

    async fn deregister(&self, id: Uuid) -> CoordinatorResult<()> {
        self.entries.write().await.remove(&id);
        Ok(())
    }

    async fn list_healthy(&self, service: &str) -> CoordinatorResult<Vec<RegistryEntry>> {
        Ok(self.entries.read().await.values().filter(|e| e.service == service).map(|e| e.entry.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_list_healthy_returns_entry() {
        let registry = InMemoryRegistry::new();
        let id = Uuid::new_v4();
        registry.register("scraping", id, "127.0.0.1", 9000, vec!["v1".to_string()], None).await.unwrap();

        let listed = registry.list_healthy("scraping").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn deregister_removes_entry() {
        let registry = InMemoryRegistry::new();
        let id = Uuid::new_v4();
        registry.register("scraping", id, "127.0.0.1", 9000, vec![], None).await.unwrap();
        registry.deregister(id).await.unwrap();
        assert!(registry.list_healthy("scraping").await.unwrap().is_empty());
    }
}
