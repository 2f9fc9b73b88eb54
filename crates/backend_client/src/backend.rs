//! The LLM backend seam.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::error::Result;
use relay_core::PromptMessage;

/// One event on a backend response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental content fragment, delivered as raw bytes so the
    /// consumer controls decode timing.
    Delta(Bytes),
    /// Terminal sentinel; no further deltas follow.
    Done,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// An authenticated channel to an LLM backend.
///
/// `submit` either returns a live event stream or fails with a classified
/// error; mid-stream failures surface as stream items.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stable identity for logging and session bookkeeping.
    fn id(&self) -> &str;

    async fn submit(&self, prompt: &[PromptMessage]) -> Result<EventStream>;
}
