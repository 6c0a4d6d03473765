pub mod in_memory_registry;
pub mod local_container;
pub mod sqlite_store;

pub use in_memory_registry::InMemoryRegistry;
pub use local_container::LocalProcessRuntime;
pub use sqlite_store::SqliteStore;
