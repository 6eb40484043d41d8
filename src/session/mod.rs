//! Login sessions
//!
//! A session is an opaque token plus the instant it was last used. It is
//! valid while `now - last_seen <= timeout`; every successful check slides
//! the window forward.
//!
//! # Components
//!
//! - [`SessionStore`]: the storage seam used by the auth gate
//! - [`MemorySessionStore`]: in-process map behind a single mutex
//! - [`SessionJanitor`]: periodic sweep of idle sessions

mod janitor;
mod memory;

pub use janitor::SessionJanitor;
pub use memory::MemorySessionStore;

use tokio::time::Instant;

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Storage for login sessions.
///
/// Implementations must make each operation atomic with respect to the
/// others. No operation may perform I/O while holding its lock.
pub trait SessionStore: Send + Sync {
    /// Insert a fresh session and return its token
    fn create(&self) -> String;

    /// Check a token and slide its expiry.
    ///
    /// Missing or stale tokens are removed and `false` is returned.
    fn touch(&self, token: &str) -> bool;

    /// Remove a token; unknown tokens are ignored
    fn delete(&self, token: &str);

    /// Remove every session idle for longer than the timeout as of `now`.
    ///
    /// Returns the number removed.
    fn sweep(&self, now: Instant) -> usize;

    /// Number of stored sessions, stale or not
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build a token from the wall clock and the current store size.
///
/// This is predictable by anyone who can guess the login time; it is kept
/// for compatibility with existing deployments rather than for strength.
pub(crate) fn token_candidate(active: usize, attempt: u32) -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    if attempt == 0 {
        format!("s_{}_{}", nanos, active)
    } else {
        format!("s_{}_{}_{}", nanos, active, attempt)
    }
}
