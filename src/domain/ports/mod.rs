pub mod container_runtime;
pub mod message_store;
pub mod relational_store;
pub mod service_registry;
pub mod websocket_broadcaster;

pub use container_runtime::ContainerRuntime;
pub use message_store::MessageStore;
pub use relational_store::RelationalStore;
pub use service_registry::ServiceRegistry;
pub use websocket_broadcaster::WebSocketBroadcaster;
