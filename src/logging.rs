//! Logging setup
//!
//! Events go to stdout and to an append-only log file. A file that has
//! grown past [`MAX_LOG_SIZE`] is moved to `<path>.old` before opening.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::FmtSubscriber;

/// Rotation threshold (10 MiB)
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Log level from `RUST_LOG`, defaulting to info
pub fn level_from_env() -> Level {
    std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO)
}

/// Backup location used by rotation
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".old");
    PathBuf::from(name)
}

/// Rotate `path` to `<path>.old` when it exceeds `max_size`.
///
/// Returns whether a rotation happened.
pub fn rotate_if_needed(path: &Path, max_size: u64) -> Result<bool> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(false),
    };
    if size <= max_size {
        return Ok(false);
    }

    let backup = backup_path(path);
    if backup.exists() {
        std::fs::remove_file(&backup)
            .with_context(|| format!("remove old log backup {}", backup.display()))?;
    }
    std::fs::rename(path, &backup)
        .with_context(|| format!("rotate log {} to {}", path.display(), backup.display()))?;
    Ok(true)
}

/// Create the log directory, rotate, and open the file for appending
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;
    }
    rotate_if_needed(path, MAX_LOG_SIZE)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// Install the global subscriber writing to stdout and `log_path`
pub fn init(log_path: &Path) -> Result<()> {
    let file = open_log_file(log_path)?;
    let writer = std::io::stdout.and(Mutex::new(file));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level_from_env())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install tracing subscriber")?;
    Ok(())
}

/// Console-only subscriber used until the config names a log file
pub fn init_console() -> Result<tracing::dispatcher::DefaultGuard> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level_from_env())
        .with_ansi(true)
        .finish();
    Ok(tracing::subscriber::set_default(subscriber))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/tmp/panel.log")),
            PathBuf::from("/tmp/panel.log.old")
        );
    }

    #[test]
    fn test_small_file_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.log");
        std::fs::write(&path, b"short").unwrap();

        assert!(!rotate_if_needed(&path, 1024).unwrap());
        assert!(path.exists());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_large_file_rotated_over_old_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.log");
        std::fs::write(&path, vec![b'x'; 64]).unwrap();
        std::fs::write(backup_path(&path), b"stale backup").unwrap();

        assert!(rotate_if_needed(&path, 16).unwrap());
        assert!(!path.exists());
        assert_eq!(std::fs::read(backup_path(&path)).unwrap().len(), 64);
    }

    #[test]
    fn test_missing_file_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!rotate_if_needed(&dir.path().join("absent.log"), 0).unwrap());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/panel.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
