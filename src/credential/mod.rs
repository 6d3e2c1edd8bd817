pub mod storage;
pub mod store;

// Re-export so callers can do "use crate::credential::{CredentialStore, MemoryStorage};"
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use store::CredentialStore;
