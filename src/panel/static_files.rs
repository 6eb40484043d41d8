//! Static file serving from the configured root

use super::pages::FALLBACK_INDEX;
use super::{ClientAddr, PanelState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use std::path::{Component, Path as FsPath, PathBuf};
use tracing::{debug, error};

/// Serve `index.html`, or the built-in page when it is missing
pub async fn index_handler(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
) -> Response {
    debug!(client = %client, "Serving index.html");
    match tokio::fs::read(state.static_dir.join("index.html")).await {
        Ok(content) => Html(content).into_response(),
        Err(_) => Html(FALLBACK_INDEX).into_response(),
    }
}

/// Serve any other file below the static root
pub async fn static_handler(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    Path(path): Path<String>,
) -> Response {
    let Some(relative) = sanitize(&path) else {
        debug!(client = %client, path = %path, "Rejected static path");
        return StatusCode::BAD_REQUEST.into_response();
    };

    if relative == FsPath::new("index.html") {
        return index_handler(State(state), ClientAddr(client)).await;
    }

    let file = state.static_dir.join(&relative);
    match tokio::fs::read(&file).await {
        Ok(content) => {
            let mime = mime_guess::from_path(&relative)
                .first_or_octet_stream()
                .to_string();
            debug!(client = %client, file = %file.display(), "Serving file");

            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime)],
                Body::from(content),
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(client = %client, file = %file.display(), "File not found");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            // directories land here as well
            debug!(client = %client, file = %file.display(), error = %e, "Unreadable file");
            if file.is_dir() {
                StatusCode::NOT_FOUND.into_response()
            } else {
                error!(file = %file.display(), error = %e, "Failed to read static file");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Relative path made only of normal components; `None` for traversal
fn sanitize(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    let mut clean = PathBuf::new();
    for component in FsPath::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        Some(PathBuf::from("index.html"))
    } else {
        Some(clean)
    }
}
