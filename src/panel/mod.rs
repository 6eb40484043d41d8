//! Web Panel Module
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 Panel Server                     │
//! ├──────────────────────────────────────────────────┤
//! │  GET|POST /login          → Login form / verify  │
//! │  GET|POST /logout         → End session          │
//! │  ── session required ─────────────────────────── │
//! │  GET /                    → index.html           │
//! │  GET /{*path}             → Static files         │
//! │  GET /api/nas_limit       → Single script        │
//! │  GET /api/network_limit   → Single script        │
//! │  GET /api/clash_limit     → Single script        │
//! │  GET /api/ban_xiaomi      → Single script        │
//! │  GET /api/website_limit   → Every target, in order│
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Every route runs under one panic-catching layer; a panicking handler
//! becomes a logged `500 Internal server error`.

pub mod api;
pub mod auth;
pub mod pages;
pub mod server;
pub mod static_files;

pub use server::PanelServer;

use crate::auth::{Credentials, LoginRateLimiter};
use crate::dispatch::Dispatcher;
use crate::panic_message;
use crate::session::SessionStore;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// State shared by every panel handler
#[derive(Clone)]
pub struct PanelState {
    pub sessions: Arc<dyn SessionStore>,
    pub credentials: Arc<Credentials>,
    pub dispatcher: Arc<Dispatcher>,
    pub login_limiter: Arc<LoginRateLimiter>,
    pub static_dir: PathBuf,
    /// Idle timeout shown on the login page
    pub session_timeout: Duration,
}

impl PanelState {
    pub fn login_page(&self, error: Option<&str>) -> String {
        pages::login_page(error, self.session_timeout)
    }
}

/// Best-effort client address for logs and rate limiting.
///
/// Never rejects: requests without connection info are reported as
/// `unknown`.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(addr))
    }
}

/// Build the full panel router
pub fn router(state: PanelState) -> Router {
    let protected = Router::new()
        .route("/", get(static_files::index_handler))
        .route("/{*path}", get(static_files::static_handler))
        .nest("/api", api::api_router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    Router::new()
        .merge(auth::auth_router())
        .merge(protected)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(handle_panic)),
        )
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    error!(panic = %panic_message(panic.as_ref()), "Handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Internal server error\n",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::runner::ScriptRunner;
    use crate::session::SESSION_COOKIE;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tokio::time::Instant;
    use tower::ServiceExt;

    /// Store whose session check always panics
    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn create(&self) -> String {
            "s_0_0".to_string()
        }
        fn touch(&self, _token: &str) -> bool {
            panic!("session table corrupted");
        }
        fn delete(&self, _token: &str) {}
        fn sweep(&self, _now: Instant) -> usize {
            0
        }
        fn len(&self) -> usize {
            0
        }
    }

    fn broken_state() -> PanelState {
        let config = AppConfig::from_json(r#"{"username":"admin","password":"secret"}"#).unwrap();
        PanelState {
            sessions: Arc::new(BrokenStore),
            credentials: Arc::new(Credentials::new(&config.username, &config.password)),
            dispatcher: Arc::new(Dispatcher::new(ScriptRunner::default(), &config)),
            login_limiter: Arc::new(LoginRateLimiter::default()),
            static_dir: PathBuf::from("/nonexistent-static-root"),
            session_timeout: config.session_timeout(),
        }
    }

    #[tokio::test]
    async fn test_panic_in_request_path_becomes_500() {
        let app = router(broken_state());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/nas_limit?action=enable")
                    .header(header::COOKIE, format!("{SESSION_COOKIE}=s_0_0"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Internal server error\n");

        // the router keeps serving after the panic
        let response = app
            .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_panic_response_hides_detail() {
        let response = handle_panic(Box::new(String::from("secret detail")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
