//! Login, logout and the session gate
//!
//! # Endpoints
//!
//! - `GET /login` - login form
//! - `POST /login` - verify credentials, issue the session cookie
//! - `GET|POST /logout` - drop the session, expire the cookie
//!
//! The session cookie is `HttpOnly`, `SameSite=Strict`, has no expiry (it
//! dies with the browser) and is `Secure` only when the request arrived over
//! HTTPS, directly or through a proxy setting `X-Forwarded-Proto`.

use super::pages;
use super::{ClientAddr, PanelState};
use crate::session::SESSION_COOKIE;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::time::{Duration, OffsetDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where unauthenticated requests are sent
pub const LOGIN_PATH: &str = "/login";

/// Landing page after a successful login
pub const POST_LOGIN_PATH: &str = "/?init=1";

/// Login form body
#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// JSON reply for script-driven logouts
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub ok: bool,
    pub redirect: &'static str,
}

/// Whether the client reached us over HTTPS
pub fn is_https(uri_scheme: Option<&str>, headers: &HeaderMap) -> bool {
    if uri_scheme.is_some_and(|s| s.eq_ignore_ascii_case("https")) {
        return true;
    }
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("https"))
}

/// Session cookie for a freshly created session
pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .build()
}

/// Cookie that clears the session on the client
pub fn expired_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

fn wants_json(headers: &HeaderMap) -> bool {
    let xhr = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));
    xhr || accepts_json
}

// ============================================================================
// Handlers
// ============================================================================

/// Login form
pub async fn login_page(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
) -> Html<String> {
    debug!(client = %client, "Login page requested");
    Html(state.login_page(None))
}

/// Credential check.
///
/// Correct credentials always log in. A client past its failure budget gets
/// 429 for further wrong guesses.
pub async fn login_submit(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    if !state.credentials.verify(&form.username, &form.password) {
        if state.login_limiter.is_limited(&client) {
            warn!(client = %client, username = %form.username, "Login rate limit exceeded");
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Html(state.login_page(Some(pages::RATE_LIMITED_MESSAGE))),
            )
                .into_response();
        }

        state.login_limiter.record_failure(&client);
        warn!(client = %client, username = %form.username, "Failed login attempt");
        return Html(state.login_page(Some(pages::BAD_CREDENTIALS_MESSAGE))).into_response();
    }

    state.login_limiter.reset(&client);
    let token = state.sessions.create();
    info!(client = %client, "User logged in");
    debug!(session = %token, "Session created");

    let secure = is_https(uri.scheme_str(), &headers);
    let jar = jar.add(session_cookie(token, secure));
    (jar, Redirect::to(POST_LOGIN_PATH)).into_response()
}

/// End the session; JSON for XHR callers, a redirect otherwise
pub async fn logout(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.delete(cookie.value());
        info!(client = %client, "User logged out");
    }

    let jar = jar.add(expired_session_cookie(is_https(uri.scheme_str(), &headers)));

    if wants_json(&headers) {
        let body = LogoutResponse {
            ok: true,
            redirect: LOGIN_PATH,
        };
        return (jar, Json(body)).into_response();
    }
    (jar, Redirect::to(LOGIN_PATH)).into_response()
}

// ============================================================================
// Middleware
// ============================================================================

/// Session gate for protected routes.
///
/// Validates and slides the session exactly once, before the handler runs.
pub async fn require_session(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        debug!(
            client = %client,
            path = %req.uri().path(),
            "No session cookie, redirecting to login"
        );
        return Redirect::to(LOGIN_PATH).into_response();
    };

    if !state.sessions.touch(cookie.value()) {
        debug!(client = %client, "Invalid or expired session, redirecting to login");
        return Redirect::to(LOGIN_PATH).into_response();
    }

    next.run(req).await
}

// ============================================================================
// Router
// ============================================================================

/// Routes reachable without a session
pub fn auth_router() -> Router<PanelState> {
    Router::new()
        .route(LOGIN_PATH, get(login_page).post(login_submit))
        .route("/logout", get(logout).post(logout))
}
