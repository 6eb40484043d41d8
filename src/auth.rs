//! Operator Authentication
//!
//! # Security Features
//!
//! - **Constant-time comparison**: submitted values are hashed with SHA-256
//!   and the digests compared with `subtle`, so timing depends on neither the
//!   position of the first mismatch nor the secret's length
//! - **No field leakage**: username and password are always both checked and
//!   the caller only sees a single boolean
//! - **Rate limiting**: after 5 failed attempts per minute from one client
//!   address, further wrong guesses are refused with 429. Correct credentials
//!   are always accepted so a shared proxy address cannot lock the operator out

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Rate limit window (60 seconds)
pub const RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// Max failed login attempts per window
pub const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// The single operator's configured credentials
pub struct Credentials {
    username: [u8; 32],
    password: [u8; 32],
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: digest(username),
            password: digest(password),
        }
    }

    /// Check a submitted username/password pair
    pub fn verify(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }

        let user_ok = digest(username).as_slice().ct_eq(self.username.as_slice());
        let pass_ok = digest(password).as_slice().ct_eq(self.password.as_slice());
        (user_ok & pass_ok).into()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Rate limit entry
#[derive(Debug, Clone)]
struct RateLimitEntry {
    failures: u32,
    window_start: DateTime<Utc>,
}

/// Per-client limiter for failed login attempts
#[derive(Debug)]
pub struct LoginRateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
    max_attempts: u32,
    window: Duration,
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(MAX_LOGIN_ATTEMPTS, Duration::seconds(RATE_LIMIT_WINDOW_SECS))
    }
}

impl LoginRateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// Whether `client` has used up its failed attempts for the current window
    pub fn is_limited(&self, client: &str) -> bool {
        self.is_limited_at(client, Utc::now())
    }

    /// Record one failed attempt
    pub fn record_failure(&self, client: &str) {
        self.record_failure_at(client, Utc::now());
    }

    /// Forget a client after a successful login
    pub fn reset(&self, client: &str) {
        self.entries.lock().remove(client);
    }

    /// Drop every entry whose window has passed; returns the number removed
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Number of tracked clients
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.window_start <= self.window);
        before - entries.len()
    }

    fn is_limited_at(&self, client: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock();
        let (expired, exhausted) = match entries.get(client) {
            Some(entry) => (
                now - entry.window_start > self.window,
                entry.failures >= self.max_attempts,
            ),
            None => return false,
        };

        if expired {
            entries.remove(client);
            return false;
        }
        exhausted
    }

    fn record_failure_at(&self, client: &str, now: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(client.to_string()).or_insert(RateLimitEntry {
            failures: 0,
            window_start: now,
        });

        if now - entry.window_start > self.window {
            entry.failures = 1;
            entry.window_start = now;
        } else {
            entry.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "operator";
    const PASS: &str = "correct horse battery";

    #[test]
    fn test_verify_accepts_exact_match() {
        let creds = Credentials::new(USER, PASS);
        assert!(creds.verify(USER, PASS));
    }

    #[test]
    fn test_verify_rejects_any_mismatch() {
        let creds = Credentials::new(USER, PASS);
        assert!(!creds.verify("Operator", PASS));
        assert!(!creds.verify(USER, "correct horse battery "));
        assert!(!creds.verify("someone", "else"));
        assert!(!creds.verify(PASS, USER));
    }

    #[test]
    fn test_verify_rejects_empty_input() {
        let creds = Credentials::new(USER, PASS);
        assert!(!creds.verify("", PASS));
        assert!(!creds.verify(USER, ""));
        assert!(!creds.verify("", ""));
    }

    #[test]
    fn test_verify_rejects_mismatch_at_every_position() {
        let creds = Credentials::new(USER, PASS);

        for (i, _) in PASS.char_indices() {
            let mut candidate: Vec<u8> = PASS.as_bytes().to_vec();
            candidate[i] ^= 0x01;
            let candidate = String::from_utf8(candidate).unwrap();
            assert!(!creds.verify(USER, &candidate), "password mismatch at {i}");
        }

        for (i, _) in USER.char_indices() {
            let mut candidate: Vec<u8> = USER.as_bytes().to_vec();
            candidate[i] ^= 0x01;
            let candidate = String::from_utf8(candidate).unwrap();
            assert!(!creds.verify(&candidate, PASS), "username mismatch at {i}");
        }
    }

    #[test]
    fn test_verify_rejects_prefixes_and_extensions() {
        let creds = Credentials::new(USER, PASS);
        for len in 1..PASS.len() {
            assert!(!creds.verify(USER, &PASS[..len]));
        }
        assert!(!creds.verify(USER, &format!("{PASS}x")));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let creds = Credentials::new(USER, PASS);
        let shown = format!("{creds:?}");
        assert!(!shown.contains(USER));
        assert!(!shown.contains(PASS));
    }

    #[test]
    fn test_rate_limit_after_max_failures() {
        let limiter = LoginRateLimiter::default();
        for _ in 0..MAX_LOGIN_ATTEMPTS {
            assert!(!limiter.is_limited("10.0.0.1"));
            limiter.record_failure("10.0.0.1");
        }
        assert!(limiter.is_limited("10.0.0.1"));
        assert!(!limiter.is_limited("10.0.0.2"));
    }

    #[test]
    fn test_rate_limit_window_expires() {
        let limiter = LoginRateLimiter::new(2, Duration::seconds(60));
        let start = Utc::now();
        limiter.record_failure_at("ip", start);
        limiter.record_failure_at("ip", start);
        assert!(limiter.is_limited_at("ip", start + Duration::seconds(30)));
        assert!(!limiter.is_limited_at("ip", start + Duration::seconds(61)));
    }

    #[test]
    fn test_sweep_drops_expired_windows() {
        let limiter = LoginRateLimiter::new(5, Duration::seconds(60));
        let start = Utc::now();
        for i in 0..100 {
            limiter.record_failure_at(&format!("10.0.{}.{}", i / 256, i % 256), start);
        }
        limiter.record_failure_at("recent", start + Duration::seconds(50));
        assert_eq!(limiter.len(), 101);

        assert_eq!(limiter.sweep_at(start + Duration::seconds(30)), 0);
        assert_eq!(limiter.sweep_at(start + Duration::seconds(61)), 100);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.sweep_at(start + Duration::seconds(61)), 0);
    }

    #[test]
    fn test_rate_limit_reset_on_success() {
        let limiter = LoginRateLimiter::new(1, Duration::seconds(60));
        limiter.record_failure("ip");
        assert!(limiter.is_limited("ip"));
        limiter.reset("ip");
        assert!(!limiter.is_limited("ip"));
    }
}
