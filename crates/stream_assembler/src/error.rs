//! Typed stream failure reasons.

use thiserror::Error;

/// Hard transport failure surfaced by the reassembler. The caller is
/// responsible for marking the owning backend session standby and retrying
/// the exchange from scratch; chunks already emitted are not rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    #[error("backend rate limited")]
    RateLimited,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend protocol error: {0}")]
    ProtocolError(String),
}
