pub mod client;

// Re-export common types
pub use client::BackendClient;
