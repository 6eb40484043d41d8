//! Control Panel - Entry Point
//!
//! Loads `config.json`, switches logging to the configured file and serves
//! the panel until SIGINT or SIGTERM.

use anyhow::Context;
use control_panel::config::CONFIG_PATH_ENV;
use control_panel::{logging, AppConfig, PanelServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Control Panel v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: control-panel");
        println!();
        println!("Reads config.json next to the executable, falling back to the");
        println!("working directory.");
        println!();
        println!("Environment variables:");
        println!("  {CONFIG_PATH_ENV:<16} Explicit config file path");
        println!("  RUST_LOG         Log level (trace, debug, info, warn, error)");
        return Ok(());
    }

    let exe_path = std::env::current_exe().context("locate executable")?;
    let base_dir = exe_path
        .parent()
        .map(|p| p.to_path_buf())
        .context("executable has no parent directory")?;

    // Console logging until the config says where the log file lives
    let console = logging::init_console()?;
    let (config, config_path) = AppConfig::locate_and_load(&base_dir)?;
    drop(console);

    logging::init(&config.log_file_path)?;

    info!("Control Panel v{}", env!("CARGO_PKG_VERSION"));
    info!(pid = std::process::id(), "Process started");
    info!(exe = %exe_path.display(), base_dir = %base_dir.display(), "Executable located");
    info!(
        config = %config_path.display(),
        log = %config.log_file_path.display(),
        "Configuration in use"
    );

    let static_dir = config.resolve_static_dir(&base_dir);
    PanelServer::new(config, static_dir).run().await
}
