//! Control Panel
//!
//! Password-protected web panel that toggles network policies on a home
//! router by running operator-supplied control scripts.
//!
//! # Features
//!
//! - **Sessions**: in-memory, sliding expiry, swept by a background janitor
//! - **Auth**: constant-time credential check, per-client login rate limit
//! - **Scripts**: hard timeout, process-group kill, capped output capture
//! - **Dispatch**: one script per capability, or an ordered target group
//!
//! # Architecture
//!
//! ```text
//! Browser ──► Panel Server ──► Session Gate ──► Dispatcher ──► Script Runner
//!               (axum)             │                              │
//!                                  ├── Session Store              └── /bin/sh scripts
//!                                  └── Janitor (interval sweep)
//! ```

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod panel;
pub mod runner;
pub mod session;

use std::any::Any;

pub use auth::{Credentials, LoginRateLimiter};
pub use config::{AppConfig, ScriptTarget};
pub use dispatch::{Action, Capability, DispatchReply, Dispatcher};
pub use panel::{PanelServer, PanelState};
pub use runner::{ExecutionResult, RunnerConfig, ScriptError, ScriptRunner};
pub use session::{MemorySessionStore, SessionJanitor, SessionStore};

/// Readable text from a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(owned.as_ref()), "boom");

        let borrowed: Box<dyn Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(borrowed.as_ref()), "static boom");

        let other: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
