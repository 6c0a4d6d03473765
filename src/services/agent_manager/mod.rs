pub mod manager;

pub use manager::{AgentManager, AgentManagerConfig, DeploymentOutcome, DeploymentStrategy};
