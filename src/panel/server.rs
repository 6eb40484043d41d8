//! Panel HTTP Server
//!
//! Axum-based server with the session gate, the janitor task, and graceful
//! shutdown bounded by a grace period.

use super::{router, PanelState};
use crate::auth::{Credentials, LoginRateLimiter};
use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::runner::{RunnerConfig, ScriptRunner};
use crate::session::{MemorySessionStore, SessionJanitor, SessionStore};
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Panel server
pub struct PanelServer {
    config: AppConfig,
    state: PanelState,
}

impl PanelServer {
    /// Wire up sessions, credentials and the script dispatcher
    pub fn new(config: AppConfig, static_dir: PathBuf) -> Self {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(MemorySessionStore::new(config.session_timeout()));
        let runner = ScriptRunner::new(RunnerConfig {
            timeout: config.script_timeout(),
            max_output_bytes: config.max_output_bytes,
        });

        let state = PanelState {
            sessions,
            credentials: Arc::new(Credentials::new(&config.username, &config.password)),
            dispatcher: Arc::new(Dispatcher::new(runner, &config)),
            login_limiter: Arc::new(LoginRateLimiter::default()),
            static_dir,
            session_timeout: config.session_timeout(),
        };

        Self { config, state }
    }

    /// Shared handler state
    pub fn state(&self) -> &PanelState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Build the router with all routes and middleware
    pub fn build_router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind the configured address and run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;

        info!("Starting panel server on {}", addr);
        info!(static_dir = %self.state.static_dir.display(), "Serving static files");

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` resolves.
    ///
    /// In-flight requests get `shutdownGraceSecs` to finish; whatever is
    /// still running after that is dropped. The janitor stops last.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let grace = self.config.shutdown_grace();
        let app = self.build_router();

        let (janitor_tx, janitor_rx) = watch::channel(false);
        let janitor = SessionJanitor::new(
            self.state.sessions.clone(),
            self.config.janitor_interval(),
        )
        .with_login_limiter(self.state.login_limiter.clone())
        .spawn(janitor_rx);

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            })
            .await
        });

        let outcome = tokio::select! {
            finished = &mut server => Some(finished),
            _ = signal => None,
        };

        let result = match outcome {
            Some(finished) => {
                error!("Panel server stopped unexpectedly");
                flatten(finished)
            }
            None => {
                let _ = stop_tx.send(true);
                match tokio::time::timeout(grace, &mut server).await {
                    Ok(finished) => flatten(finished),
                    Err(_) => {
                        warn!(
                            grace_secs = grace.as_secs(),
                            "Shutdown grace elapsed, dropping open connections"
                        );
                        server.abort();
                        Ok(())
                    }
                }
            }
        };

        let _ = janitor_tx.send(true);
        if let Err(e) = janitor.await {
            warn!(error = %e, "Session janitor did not stop cleanly");
        }

        if result.is_ok() {
            info!("Panel server shut down gracefully");
        }
        result
    }
}

fn flatten(
    finished: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    finished.context("server task failed")?.context("server error")
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
