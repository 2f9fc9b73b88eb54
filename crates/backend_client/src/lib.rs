//! LLM backend trait and the API-key backed streaming client.

pub mod backend;
pub mod error;
pub mod models;
pub mod openai;

pub use backend::{EventStream, LlmBackend, StreamEvent};
pub use error::{BackendError, Result};
pub use openai::OpenAiBackend;
