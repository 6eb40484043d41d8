//! Action Dispatch
//!
//! Turns an `?action=` request into script runs and a plain-text reply.
//! Single-target actions run one script; the website limit runs every
//! configured target in order and fails as a whole if any target fails,
//! while still reporting every target's output.

use crate::config::{AppConfig, ScriptTarget};
use crate::runner::ScriptRunner;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

/// Permitted values of the `action` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Enable,
    Disable,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Enable => "enable",
            Action::Disable => "disable",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enable" => Ok(Action::Enable),
            "disable" => Ok(Action::Disable),
            _ => Err(()),
        }
    }
}

/// Single-script capabilities exposed under `/api`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    NasLimit,
    NetworkLimit,
    ClashLimit,
    BanXiaomi,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::NasLimit,
        Capability::NetworkLimit,
        Capability::ClashLimit,
        Capability::BanXiaomi,
    ];

    /// Name used in the URL and in replies
    pub fn name(&self) -> &'static str {
        match self {
            Capability::NasLimit => "nas_limit",
            Capability::NetworkLimit => "network_limit",
            Capability::ClashLimit => "clash_limit",
            Capability::BanXiaomi => "ban_xiaomi",
        }
    }
}

/// Name of the multi-target action
pub const WEBSITE_LIMIT: &str = "website_limit";

/// Plain-text reply produced by a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    pub status: StatusCode,
    pub body: String,
}

impl DispatchReply {
    fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

impl IntoResponse for DispatchReply {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.body,
        )
            .into_response()
    }
}

/// Maps actions onto configured scripts
#[derive(Debug, Clone)]
pub struct Dispatcher {
    runner: ScriptRunner,
    nas_limit: String,
    network_limit: String,
    clash_limit: String,
    ban_xiaomi: String,
    website_limit: Vec<ScriptTarget>,
}

impl Dispatcher {
    pub fn new(runner: ScriptRunner, config: &AppConfig) -> Self {
        Self {
            runner,
            nas_limit: config.nas_limit_script.clone(),
            network_limit: config.network_limit_script.clone(),
            clash_limit: config.clash_limit_script.clone(),
            ban_xiaomi: config.ban_xiaomi_script.clone(),
            website_limit: config.website_limit_scripts.clone(),
        }
    }

    pub fn script_for(&self, capability: Capability) -> &str {
        match capability {
            Capability::NasLimit => &self.nas_limit,
            Capability::NetworkLimit => &self.network_limit,
            Capability::ClashLimit => &self.clash_limit,
            Capability::BanXiaomi => &self.ban_xiaomi,
        }
    }

    pub fn website_targets(&self) -> &[ScriptTarget] {
        &self.website_limit
    }

    /// Run the script behind a single capability
    pub async fn dispatch(
        &self,
        capability: Capability,
        action: Option<&str>,
        client: &str,
    ) -> DispatchReply {
        let name = capability.name();
        let raw = action.unwrap_or_default();
        info!(api = name, action = raw, client, "API request");

        let Ok(action) = raw.parse::<Action>() else {
            warn!(api = name, action = raw, client, "Invalid action");
            return DispatchReply::new(
                StatusCode::BAD_REQUEST,
                "Invalid action. Use 'enable' or 'disable'.\n",
            );
        };

        let result = self.runner.run(self.script_for(capability), action.as_str()).await;
        match result.error {
            None => DispatchReply::new(StatusCode::OK, format!("{}\n", result.output)),
            Some(err) => {
                error!(
                    api = name,
                    %action,
                    kind = err.kind(),
                    error = %err,
                    "Script execution failed"
                );
                DispatchReply::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "Script execution failed for {name} ({action}):\n{}\n\nError:\n{err}\n",
                        result.output
                    ),
                )
            }
        }
    }

    /// Run every website limit target in configuration order
    pub async fn dispatch_all(&self, action: Option<&str>, client: &str) -> DispatchReply {
        let raw = action.unwrap_or_default();
        info!(api = WEBSITE_LIMIT, action = raw, client, "API request");

        let Ok(action) = raw.parse::<Action>() else {
            warn!(api = WEBSITE_LIMIT, action = raw, client, "Invalid action");
            return DispatchReply::new(
                StatusCode::BAD_REQUEST,
                "Invalid action parameter. Use 'enable' or 'disable'.\n",
            );
        };

        if self.website_limit.is_empty() {
            error!("No website limit scripts configured");
            return DispatchReply::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "No website limit scripts configured.\n",
            );
        }

        let mut blocks = Vec::with_capacity(self.website_limit.len());
        let mut all_ok = true;
        for target in &self.website_limit {
            let result = self.runner.run(&target.script_path, action.as_str()).await;
            match result.error {
                None => blocks.push(format!("--- Script ID: {} ---\n{}", target.id, result.output)),
                Some(err) => {
                    all_ok = false;
                    error!(
                        api = WEBSITE_LIMIT,
                        id = %target.id,
                        kind = err.kind(),
                        error = %err,
                        "Target failed"
                    );
                    blocks.push(format!(
                        "--- Script ID: {} ---\n{}\nError: {err}",
                        target.id, result.output
                    ));
                }
            }
        }

        let status = if all_ok {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        DispatchReply::new(status, format!("{}\n", blocks.join("\n\n")))
    }
}
