//! Dispatch layer: backend session pool, rate limiting, the retry queue,
//! user session lifetimes and the exchange pipeline that ties them to the
//! conversation store and stream reassembler.

pub mod dispatcher;
pub mod pool;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod user_session;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use pool::BotPool;
pub use rate_limit::RateLimiter;
pub use retry::{PendingQuestion, RetryQueue};
pub use session::{BackendSession, ExchangeGuard};
pub use user_session::{ContactKind, UserSession, UserSessionTracker, SESSION_TTL};
