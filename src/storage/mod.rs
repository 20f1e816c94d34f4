pub mod state;

// Re-export common types
pub use state::{MemoryStateStore, RedisStateStore, StateStore};
