//! Flush policy - per-backend framing configuration.

use std::time::Duration;

/// Controls when a partial buffer becomes eligible to flush as a chunk.
///
/// Provider framing differs (some mix `\r\n` headers into the stream), so
/// the boundary marker is configuration per backend rather than a universal
/// constant. The debounce is a latency/smoothness trade-off, not a
/// correctness requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Paragraph boundary marker scanned for in the decoded buffer.
    pub boundary: String,
    /// Minimum elapsed time between emitted chunks.
    pub debounce: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            boundary: "\n\n".to_string(),
            debounce: Duration::from_secs(1),
        }
    }
}

impl FlushPolicy {
    pub fn new(boundary: impl Into<String>, debounce: Duration) -> Self {
        Self {
            boundary: boundary.into(),
            debounce,
        }
    }
}
