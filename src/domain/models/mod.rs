pub mod agent;
pub mod config;
pub mod message;
pub mod optimization;
pub mod resource;
pub mod task;

pub use agent::{AgentContext, AgentInstance, AgentPerformance, AgentSpec, AgentType, AgentWorkload};
pub use config::Config;
pub use message::{Message, MessageType, TaskStatusRecord};
pub use optimization::{OptimizationExecution, OptimizationPlan, OptimizationRecommendation, OptimizationState};
pub use resource::{Conflict, CoordinationEvent, CoordinationEventType, ResolvedConflict, SharedResource};
pub use task::{AgentTypeFilter, BoundedHistory, Priority, TaskDefinition, TaskExecution, TaskStatus};
