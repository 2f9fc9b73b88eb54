//! Shared error taxonomy for the relay.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The new message plus system role already exceeds the prompt budget.
    /// User-correctable; surfaced as a friendly reply and never retried.
    #[error("prompt exceeds the configured token budget")]
    PromptTooLarge,

    /// Per-conversation request limit hit. Carries the wait until the
    /// oldest request in the window expires.
    #[error("rate limit exceeded, next request allowed in {:.2} seconds", .retry_after.as_secs_f64())]
    RateLimitExceeded { retry_after: Duration },

    /// The backend rejected or dropped the exchange; the owning session is
    /// placed on standby and the message requeued.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend protocol error: {0}")]
    ProtocolError(String),

    /// A dangling parent pointer or corrupt record. Fatal for the affected
    /// conversation; never silently swallowed.
    #[error("data integrity fault: {0}")]
    DataIntegrityFault(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
