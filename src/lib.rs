//! swarmkeeper — control plane for a fleet of autonomous worker agents:
//! message bus, task orchestrator, agent manager, coordination service,
//! and optimization engine.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod services;

pub use error::{CoordinatorError, CoordinatorResult};
