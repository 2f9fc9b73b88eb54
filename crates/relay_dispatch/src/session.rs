//! Backend session entity.
//!
//! Wraps one authenticated backend channel with the dispatch bookkeeping
//! the pool needs: standby/busy state behind accessor methods, the set of
//! users routed to this session, and an exclusivity lock so two exchanges
//! never share one backend identity concurrently.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use backend_client::LlmBackend;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

#[derive(Default)]
struct SessionState {
    standby: bool,
    busy: bool,
    assigned_users: HashSet<String>,
    idle_ticks: u64,
}

pub struct BackendSession {
    backend: Arc<dyn LlmBackend>,
    state: Mutex<SessionState>,
    exchange_lock: AsyncMutex<()>,
}

/// Holds the session's exclusivity lock for the duration of one exchange.
/// Dropping the guard clears the busy flag and releases the lock.
pub struct ExchangeGuard<'a> {
    session: &'a BackendSession,
    _lock: AsyncMutexGuard<'a, ()>,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.session.state().busy = false;
    }
}

impl BackendSession {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(SessionState::default()),
            exchange_lock: AsyncMutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        self.backend.id()
    }

    pub fn backend(&self) -> Arc<dyn LlmBackend> {
        Arc::clone(&self.backend)
    }

    /// Acquire the session for one exchange. Waits if another exchange is
    /// in flight; the busy flag is set while the guard lives.
    pub async fn begin_exchange(&self) -> ExchangeGuard<'_> {
        let lock = self.exchange_lock.lock().await;
        self.state().busy = true;
        ExchangeGuard {
            session: self,
            _lock: lock,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    /// A standby session is excluded from selection until explicitly
    /// cleared (rate limited or failed backend).
    pub fn is_standby(&self) -> bool {
        self.state().standby
    }

    pub fn mark_standby(&self) {
        tracing::warn!(session = self.id(), "backend session placed on standby");
        self.state().standby = true;
    }

    pub fn clear_standby(&self) {
        self.state().standby = false;
    }

    pub fn assign_user(&self, user_id: &str) {
        self.state().assigned_users.insert(user_id.to_string());
    }

    pub fn release_user(&self, user_id: &str) {
        self.state().assigned_users.remove(user_id);
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.state().assigned_users.contains(user_id)
    }

    pub fn assigned_count(&self) -> usize {
        self.state().assigned_users.len()
    }

    /// Advance the idle counter by one tick; returns the new value.
    pub fn tick_idle(&self) -> u64 {
        let mut state = self.state();
        state.idle_ticks += 1;
        state.idle_ticks
    }

    pub fn reset_idle(&self) {
        self.state().idle_ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backend_client::{EventStream, Result as BackendResult, StreamEvent};
    use relay_core::PromptMessage;

    struct NullBackend;

    #[async_trait]
    impl LlmBackend for NullBackend {
        fn id(&self) -> &str {
            "null"
        }

        async fn submit(&self, _prompt: &[PromptMessage]) -> BackendResult<EventStream> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(StreamEvent::Done)])))
        }
    }

    fn session() -> BackendSession {
        BackendSession::new(Arc::new(NullBackend))
    }

    #[tokio::test]
    async fn exchange_guard_sets_and_clears_busy() {
        let session = session();
        assert!(!session.is_busy());
        {
            let _guard = session.begin_exchange().await;
            assert!(session.is_busy());
        }
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn standby_transitions() {
        let session = session();
        assert!(!session.is_standby());
        session.mark_standby();
        assert!(session.is_standby());
        session.clear_standby();
        assert!(!session.is_standby());
    }

    #[tokio::test]
    async fn user_assignment_bookkeeping() {
        let session = session();
        session.assign_user("alice");
        session.assign_user("alice");
        session.assign_user("bob");
        assert_eq!(session.assigned_count(), 2);
        assert!(session.has_user("alice"));

        session.release_user("alice");
        assert!(!session.has_user("alice"));
        assert_eq!(session.assigned_count(), 1);
    }

    #[tokio::test]
    async fn idle_counter() {
        let session = session();
        assert_eq!(session.tick_idle(), 1);
        assert_eq!(session.tick_idle(), 2);
        session.reset_idle();
        assert_eq!(session.tick_idle(), 1);
    }
}
