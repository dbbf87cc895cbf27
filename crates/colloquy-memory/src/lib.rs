pub mod memory;
pub mod store;

pub use memory::MemoryCheckpointStore;
pub use store::SqliteCheckpointStore;
