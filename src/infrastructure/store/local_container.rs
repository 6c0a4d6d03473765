//! Process-based [`ContainerRuntime`] for local/dev deployments: each
//! agent instance is a child process rather than an actual container.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::agent::{ContainerHandle, HealthResult};
use crate::domain::ports::container_runtime::{ContainerRuntime, CreateSpec, Inspection, RuntimeStatus};
use crate::error::{CoordinatorError, CoordinatorResult};

struct Managed {
    child: Child,
}

/// Spawns `agent_binary <agent-type-as-str>` with the spec's env map,
/// one child process per handle.
pub struct LocalProcessRuntime {
    agent_binary: String,
    processes: Mutex<HashMap<String, Managed>>,
}

impl LocalProcessRuntime {
    pub fn new(agent_binary: impl Into<String>) -> Self {
        Self { agent_binary: agent_binary.into(), processes: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl ContainerRuntime for LocalProcessRuntime {
    async fn create(&self, spec: CreateSpec) -> CoordinatorResult<ContainerHandle> {
        let handle = ContainerHandle(format!("proc-{}", Uuid::new_v4()));
        let mut command = Command::new(&self.agent_binary);
        command.arg(spec.agent_type.as_str()).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let child = command
            .spawn()
            .map_err(|e| CoordinatorError::TransientIo { collaborator: "local_container_runtime".to_string(), source: e.into() })?;

        info!(handle = %handle.0, image = %spec.image, "spawned local agent process");
        self.processes.lock().await.insert(handle.0.clone(), Managed { child });
        Ok(handle)
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> CoordinatorResult<()> {
        let mut processes = self.processes.lock().await;
        let Some(managed) = processes.get_mut(&handle.0) else {
            return Ok(());
        };

        if let Some(pid) = managed.child.id() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        match tokio::time::timeout(grace, managed.child.wait()).await {
            Ok(Ok(status)) => info!(handle = %handle.0, ?status, "agent process exited"),
            Ok(Err(err)) => warn!(handle = %handle.0, %err, "error waiting for agent process exit"),
            Err(_) => {
                warn!(handle = %handle.0, "graceful stop timed out, killing");
                let _ = managed.child.kill().await;
            }
        }
        processes.remove(&handle.0);
        Ok(())
    }

    async fn kill(&self, handle: &ContainerHandle) -> CoordinatorResult<()> {
        let mut processes = self.processes.lock().await;
        if let Some(mut managed) = processes.remove(&handle.0) {
            let _ = managed.child.kill().await;
        }
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> CoordinatorResult<Inspection> {
        let mut processes = self.processes.lock().await;
        let Some(managed) = processes.get_mut(&handle.0) else {
            return Ok(Inspection { status: RuntimeStatus::Missing, health: None });
        };

        let status = match managed.child.try_wait() {
            Ok(Some(_)) => RuntimeStatus::NotRunning,
            Ok(None) => RuntimeStatus::Running,
            Err(_) => RuntimeStatus::Missing,
        };
        let health = if status == RuntimeStatus::Running { Some(HealthResult::Healthy) } else { Some(HealthResult::Critical) };
        Ok(Inspection { status, health })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::AgentType;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn create_then_inspect_reports_running() {
        let runtime = LocalProcessRuntime::new("yes");
        let spec = CreateSpec {
            image: "yes".to_string(),
            env: BTreeMap::new(),
            mounts: vec![],
            cpu_limit_millis: 100,
            memory_limit_mb: 64,
            labels: BTreeMap::new(),
            network: None,
            exposed_ports: vec![],
            health_check: None,
            agent_type: AgentType::Monitoring,
        };
        let handle = runtime.create(spec).await.unwrap();
        let inspection = runtime.inspect(&handle).await.unwrap();
        assert_eq!(inspection.status, RuntimeStatus::Running);
        runtime.kill(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn inspect_unknown_handle_reports_missing() {
        let runtime = LocalProcessRuntime::new("yes");
        let inspection = runtime.inspect(&ContainerHandle("nonexistent".to_string())).await.unwrap();
        assert_eq!(inspection.status, RuntimeStatus::Missing);
    }
}
