//! Durable conversation history and prompt window assembly.

pub mod error;
pub mod kv;
pub mod prompt;
pub mod store;

pub use error::{Result, StoreError};
pub use kv::{DurableMap, FileKvStore, MemoryKvStore};
pub use prompt::{PromptError, PromptWindowBuilder};
pub use store::ConversationStore;
