//! Panel API Endpoints
//!
//! Every endpoint takes `?action=enable|disable` and answers in plain text.
//!
//! Routes:
//! - GET /nas_limit
//! - GET /network_limit
//! - GET /clash_limit
//! - GET /ban_xiaomi
//! - GET /website_limit - runs every configured target in order

use super::{ClientAddr, PanelState};
use crate::dispatch::{Capability, DispatchReply, WEBSITE_LIMIT};
use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;

/// `?action=` query; absent or unparsable values are rejected downstream
#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    #[serde(default)]
    pub action: Option<String>,
}

async fn run_capability(
    capability: Capability,
    state: PanelState,
    client: String,
    query: ActionQuery,
) -> DispatchReply {
    state
        .dispatcher
        .dispatch(capability, query.action.as_deref(), &client)
        .await
}

pub async fn nas_limit(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    Query(query): Query<ActionQuery>,
) -> DispatchReply {
    run_capability(Capability::NasLimit, state, client, query).await
}

pub async fn network_limit(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    Query(query): Query<ActionQuery>,
) -> DispatchReply {
    run_capability(Capability::NetworkLimit, state, client, query).await
}

pub async fn clash_limit(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    Query(query): Query<ActionQuery>,
) -> DispatchReply {
    run_capability(Capability::ClashLimit, state, client, query).await
}

pub async fn ban_xiaomi(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    Query(query): Query<ActionQuery>,
) -> DispatchReply {
    run_capability(Capability::BanXiaomi, state, client, query).await
}

pub async fn website_limit(
    State(state): State<PanelState>,
    ClientAddr(client): ClientAddr,
    Query(query): Query<ActionQuery>,
) -> DispatchReply {
    state
        .dispatcher
        .dispatch_all(query.action.as_deref(), &client)
        .await
}

/// Create the API router; mounted under `/api` behind the session gate
pub fn api_router() -> Router<PanelState> {
    Router::new()
        .route(&route(Capability::NasLimit), get(nas_limit))
        .route(&route(Capability::NetworkLimit), get(network_limit))
        .route(&route(Capability::ClashLimit), get(clash_limit))
        .route(&route(Capability::BanXiaomi), get(ban_xiaomi))
        .route(&format!("/{WEBSITE_LIMIT}"), get(website_limit))
}

fn route(capability: Capability) -> String {
    format!("/{}", capability.name())
}
