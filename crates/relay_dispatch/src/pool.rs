//! Backend session pool and selection policy.

use std::sync::Arc;

use backend_client::{LlmBackend, StreamEvent};
use futures_util::StreamExt;
use rand::seq::SliceRandom;
use relay_core::PromptMessage;

use crate::session::BackendSession;

/// Canned probe messages used to test a standby session's health.
const KEEPALIVE_PROBES: &[&str] = &["Hello", "Hi", "Hey", "How are you?", "What's up?", "Yo"];

/// Idle ticks (one per second) before a session is probed: 15 minutes.
const KEEPALIVE_IDLE_TICKS: u64 = 60 * 15;

pub struct BotPool {
    sessions: Vec<Arc<BackendSession>>,
}

impl BotPool {
    pub fn new(sessions: Vec<Arc<BackendSession>>) -> Self {
        Self { sessions }
    }

    pub fn from_backends(backends: Vec<Arc<dyn LlmBackend>>) -> Self {
        Self::new(
            backends
                .into_iter()
                .map(|b| Arc::new(BackendSession::new(b)))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> &[Arc<BackendSession>] {
        &self.sessions
    }

    /// Select a session for `user_id`.
    ///
    /// Standby sessions are never selected. A session already routed to
    /// this user wins (sticky routing preserves backend-side state);
    /// otherwise the least-loaded session by assigned-user count is chosen.
    /// Returns `None` when the pool is empty or fully on standby.
    pub fn choose(&self, user_id: &str) -> Option<Arc<BackendSession>> {
        let available: Vec<&Arc<BackendSession>> = self
            .sessions
            .iter()
            .filter(|s| !s.is_standby())
            .collect();

        if let Some(sticky) = available.iter().find(|s| s.has_user(user_id)) {
            return Some(Arc::clone(sticky));
        }

        available
            .into_iter()
            .min_by_key(|s| s.assigned_count())
            .cloned()
    }

    /// Drop a user's sticky association from every session. Called when the
    /// user's session expires.
    pub fn release_user(&self, user_id: &str) {
        for session in &self.sessions {
            session.release_user(user_id);
        }
    }

    /// One keepalive tick (expected once per second).
    ///
    /// Sessions idle past the threshold get their counter reset; a standby
    /// session among them is probed with a canned greeting and returned to
    /// rotation if the probe succeeds.
    pub async fn keepalive_tick(&self) {
        for session in &self.sessions {
            if session.tick_idle() < KEEPALIVE_IDLE_TICKS {
                continue;
            }
            session.reset_idle();
            if !session.is_standby() {
                continue;
            }
            let probe = KEEPALIVE_PROBES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("Hello");
            tracing::info!(session = session.id(), "probing standby session");
            // A probe is a real submission, so it takes the exchange lock.
            let _exchange = session.begin_exchange().await;
            match session.backend().submit(&[PromptMessage::user(probe)]).await {
                Ok(mut stream) => {
                    // Any response at all means the backend is serving again.
                    match stream.next().await {
                        Some(Ok(StreamEvent::Delta(_))) | Some(Ok(StreamEvent::Done)) | None => {
                            tracing::info!(session = session.id(), "standby cleared");
                            session.clear_standby();
                        }
                        Some(Err(e)) => {
                            tracing::warn!(session = session.id(), error = %e, "probe failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(session = session.id(), error = %e, "probe failed");
                }
            }
        }
    }
}
