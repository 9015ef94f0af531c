// Re-export needed modules for testing
pub mod api;
pub mod chat;
pub mod models;
pub mod session;

// Re-export main types for convenience
pub use chat::ChatEngine;
pub use models::*;
