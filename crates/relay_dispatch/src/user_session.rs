//! Per-user session lifetime tracking.
//!
//! A user session is live while the user keeps talking; after fifteen
//! minutes of silence it expires and is archived. A returning archived
//! user gets a fresh session, which means their conversation thread is
//! restarted from scratch rather than resumed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Idle time before a user session expires.
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 15);

#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: String,
    pub conversation_id: String,
    expires_at: Instant,
}

impl UserSession {
    fn new(user_id: &str, conversation_id: &str, ttl: Duration) -> Self {
        Self {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn touch(&mut self, ttl: Duration) {
        self.expires_at = Instant::now() + ttl;
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// What `contact` found about the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactKind {
    /// First message from this user.
    New,
    /// Session is live; TTL refreshed.
    Active,
    /// The user returned after an expired session. The caller must reset
    /// the conversation's parent pointer so a fresh thread starts.
    Revived,
}

#[derive(Default)]
struct TrackerState {
    active: HashMap<String, UserSession>,
    archived: HashMap<String, UserSession>,
}

pub struct UserSessionTracker {
    ttl: Duration,
    state: Mutex<TrackerState>,
}

impl Default for UserSessionTracker {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

impl UserSessionTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register activity from a user and report what kind of contact it was.
    pub fn contact(&self, user_id: &str, conversation_id: &str) -> ContactKind {
        let mut state = self.state();
        if let Some(session) = state.active.get_mut(user_id) {
            session.touch(self.ttl);
            return ContactKind::Active;
        }

        let kind = if state.archived.remove(user_id).is_some() {
            ContactKind::Revived
        } else {
            ContactKind::New
        };
        state.active.insert(
            user_id.to_string(),
            UserSession::new(user_id, conversation_id, self.ttl),
        );
        kind
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.state().active.contains_key(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.state().active.len()
    }

    /// Archive sessions past their TTL, returning the expired sessions so
    /// the caller can release pool assignments and reset thread pointers.
    pub fn sweep(&self) -> Vec<UserSession> {
        let now = Instant::now();
        let mut state = self.state();
        let expired: Vec<String> = state
            .active
            .iter()
            .filter(|(_, s)| s.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut sessions = Vec::with_capacity(expired.len());
        for user_id in expired {
            if let Some(session) = state.active.remove(&user_id) {
                state.archived.insert(user_id, session.clone());
                sessions.push(session);
            }
        }
        sessions
    }
}
