use super::{token_candidate, SessionStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// In-memory session store.
///
/// Readers and writers share one exclusive lock so that the check and the
/// refresh in [`SessionStore::touch`] happen in one critical section.
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Instant>>,
    timeout: Duration,
}

impl MemorySessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Last-seen instant of a token without refreshing it
    pub fn last_seen(&self, token: &str) -> Option<Instant> {
        self.sessions.lock().get(token).copied()
    }

    fn is_stale(&self, last_seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_seen) > self.timeout
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> String {
        let mut sessions = self.sessions.lock();
        let active = sessions.len();

        let mut attempt = 0;
        let mut token = token_candidate(active, attempt);
        while sessions.contains_key(&token) {
            attempt += 1;
            token = token_candidate(active, attempt);
        }

        sessions.insert(token.clone(), Instant::now());
        token
    }

    fn touch(&self, token: &str) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();

        match sessions.get_mut(token) {
            Some(last_seen) if !self.is_stale(*last_seen, now) => {
                *last_seen = now;
                true
            }
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }

    fn delete(&self, token: &str) {
        self.sessions.lock().remove(token);
    }

    fn sweep(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, last_seen| !self.is_stale(*last_seen, now));
        before - sessions.len()
    }

    fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
