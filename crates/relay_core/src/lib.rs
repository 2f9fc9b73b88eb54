//! Core types and traits shared across the relay workspace.

pub mod config;
pub mod error;
pub mod exchange;
pub mod message;
pub mod tokens;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use exchange::{Exchange, DEFAULT_SYSTEM_ROLE};
pub use message::{ChunkFrame, InboundMessage, PromptMessage, Role};
