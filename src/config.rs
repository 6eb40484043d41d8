//! Configuration management
//!
//! The panel reads a single JSON document. Keys are camelCase; everything
//! except the operator credentials has a default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default listen port
pub const DEFAULT_SERVER_PORT: u16 = 20000;

/// Default log file location
pub const DEFAULT_LOG_PATH: &str = "/tmp/controlpanel.log";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "APP_CONFIG_PATH";

const CONFIG_FILE_NAME: &str = "config.json";

/// One member of the multi-target website limit group
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptTarget {
    pub id: String,
    pub script_path: String,
}

impl ScriptTarget {
    pub fn new(id: impl Into<String>, script_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script_path: script_path.into(),
        }
    }
}

/// Panel configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Operator username
    pub username: String,

    /// Operator password
    pub password: String,

    /// Listen port; accepts `"20000"` as well as `20000`
    #[serde(default = "default_port", deserialize_with = "port_from_str_or_number")]
    pub server_port: u16,

    /// Listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Log file path
    #[serde(default = "default_log_path")]
    pub log_file_path: PathBuf,

    /// Static file root (resolved next to the executable when unset)
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    #[serde(default)]
    pub nas_limit_script: String,

    #[serde(default)]
    pub network_limit_script: String,

    #[serde(default)]
    pub clash_limit_script: String,

    #[serde(default)]
    pub ban_xiaomi_script: String,

    /// Targets run in order by the website limit action
    #[serde(default)]
    pub website_limit_scripts: Vec<ScriptTarget>,

    /// Sliding session timeout in seconds
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Wall-clock limit for a single script run
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,

    /// How often the session janitor sweeps
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,

    /// Time given to in-flight requests on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Cap on captured bytes per output stream
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_PATH)
}

fn default_session_timeout_secs() -> u64 {
    30 * 60
}

fn default_script_timeout_secs() -> u64 {
    30
}

fn default_janitor_interval_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn port_from_str_or_number<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) if text.trim().is_empty() => Ok(DEFAULT_SERVER_PORT),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl AppConfig {
    /// Parse and validate a config document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading config");
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config =
            Self::from_json(&raw).with_context(|| format!("parse config {}", path.display()))?;

        info!(path = %path.display(), "Config loaded");
        debug!(
            username = %config.username,
            port = config.server_port,
            log_path = %config.log_file_path.display(),
            "Config values"
        );
        debug!(
            nas = !config.nas_limit_script.is_empty(),
            network = !config.network_limit_script.is_empty(),
            clash = !config.clash_limit_script.is_empty(),
            ban_xiaomi = !config.ban_xiaomi_script.is_empty(),
            website = config.website_limit_scripts.len(),
            "Scripts configured"
        );
        Ok(config)
    }

    /// Find and load the config file.
    ///
    /// `APP_CONFIG_PATH` wins, then `config.json` next to the executable.
    /// If that fails, `config.json` in the working directory is tried.
    pub fn locate_and_load(base_dir: &Path) -> Result<(Self, PathBuf)> {
        let primary = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => {
                info!(path = %path, "Using config path from {}", CONFIG_PATH_ENV);
                PathBuf::from(path)
            }
            _ => base_dir.join(CONFIG_FILE_NAME),
        };

        let first_err = match Self::load(&primary) {
            Ok(config) => return Ok((config, primary)),
            Err(e) => e,
        };

        let cwd = std::env::current_dir()
            .with_context(|| format!("load config failed ({first_err:#}) and cwd is unavailable"))?;
        let fallback = cwd.join(CONFIG_FILE_NAME);
        warn!(
            path = %primary.display(),
            error = %first_err,
            "Config load failed, trying working directory"
        );

        match Self::load(&fallback) {
            Ok(config) => Ok((config, fallback)),
            Err(second_err) => bail!("load config failed: {first_err:#} / {second_err:#}"),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.username.is_empty() || self.password.is_empty() {
            bail!("username and password must be set");
        }
        if self.session_timeout_secs == 0 {
            bail!("sessionTimeoutSecs must be positive");
        }
        if self.script_timeout_secs == 0 {
            bail!("scriptTimeoutSecs must be positive");
        }
        if self.janitor_interval_secs == 0 {
            bail!("janitorIntervalSecs must be positive");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.server_port)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Static root: configured value, else `<base>/static`, else `<cwd>/static`
    pub fn resolve_static_dir(&self, base_dir: &Path) -> PathBuf {
        if let Some(dir) = &self.static_dir {
            return dir.clone();
        }

        let beside_exe = base_dir.join("static");
        if beside_exe.is_dir() {
            return beside_exe;
        }

        match std::env::current_dir() {
            Ok(cwd) => {
                let dir = cwd.join("static");
                info!(
                    dir = %dir.display(),
                    "Static directory not found beside executable, using working directory"
                );
                dir
            }
            Err(_) => beside_exe,
        }
    }
}
