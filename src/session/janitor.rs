use super::SessionStore;
use crate::auth::LoginRateLimiter;
use crate::panic_message;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Background task evicting idle sessions on a fixed interval.
///
/// Optionally also drops expired login rate limit windows.
pub struct SessionJanitor {
    store: Arc<dyn SessionStore>,
    login_limiter: Option<Arc<LoginRateLimiter>>,
    interval: Duration,
}

impl SessionJanitor {
    pub fn new(store: Arc<dyn SessionStore>, interval: Duration) -> Self {
        Self {
            store,
            login_limiter: None,
            interval,
        }
    }

    pub fn with_login_limiter(mut self, limiter: Arc<LoginRateLimiter>) -> Self {
        self.login_limiter = Some(limiter);
        self
    }

    /// Spawn the sweep loop; it exits once `shutdown` flips to `true`
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run one sweep, containing any panic raised by the store.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep_once(&self) -> Option<usize> {
        if let Some(limiter) = &self.login_limiter {
            match std::panic::catch_unwind(AssertUnwindSafe(|| limiter.sweep())) {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Cleaned expired login limits"),
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "Login limit sweep panicked");
                }
            }
        }

        let now = Instant::now();
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.store.sweep(now))) {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, active = self.store.len(), "Cleaned expired sessions");
                }
                Some(removed)
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "Session sweep panicked");
                None
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Session janitor started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Session janitor stopped");
    }
}
