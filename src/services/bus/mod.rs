pub mod in_memory_store;
pub mod message_bus;

pub use in_memory_store::InMemoryStore;
pub use message_bus::{MessageBus, MessageHandler, TaskResult};
