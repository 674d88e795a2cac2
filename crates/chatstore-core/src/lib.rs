pub mod ai;
pub mod config;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use ai::OllamaClient;
pub use config::Config;
pub use registry::{Store, StoreRegistry};
pub use session::ChatSession;
pub use state::{ChatMessage, ChatRole, ChatState, Field};
pub use store::{ChatStore, Notification, StoreEvent, StoreSubscription};
