//! Control Script Execution
//!
//! Runs one external program with a single action argument and captures
//! what it prints.
//!
//! - **Resolution**: absolute paths are used as-is; relative paths are
//!   tried against the working directory, then the executable's directory
//! - **Timeout**: hard wall-clock limit; on expiry the script's whole
//!   process group is killed
//! - **Output**: stdout followed by stderr, returned on failure as well
//! - **Output limits**: each stream is capped, the rest is drained and dropped

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How long to keep reading pipes after the script itself is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum execution time
    pub timeout: Duration,
    /// Maximum captured bytes per output stream
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024, // 1 MB
        }
    }
}

/// Why a script run did not succeed.
///
/// Display strings are shown to the operator and never include paths.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script path for action '{action}' is not configured")]
    EmptyPath { action: String },

    #[error("script not found")]
    NotFound { path: PathBuf },

    #[error("script execution timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("failed to start script: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("script exited with {0}")]
    Exit(ExitStatus),

    #[error("failed to wait for script: {0}")]
    Wait(#[source] std::io::Error),
}

impl ScriptError {
    /// Short classification used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::EmptyPath { .. } => "not_configured",
            ScriptError::NotFound { .. } => "not_found",
            ScriptError::Timeout { .. } => "timeout",
            ScriptError::Spawn(_) | ScriptError::Exit(_) | ScriptError::Wait(_) => {
                "execution_failed"
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ScriptError::Timeout { .. })
    }
}

/// Outcome of one script run
#[derive(Debug)]
pub struct ExecutionResult {
    /// Combined stdout and stderr
    pub output: String,
    /// Wall-clock time from start to result
    pub duration: Duration,
    /// Whether any output was dropped by the size cap
    pub truncated: bool,
    /// `None` on success
    pub error: Option<ScriptError>,
}

impl ExecutionResult {
    fn failed(error: ScriptError, started: Instant) -> Self {
        Self {
            output: String::new(),
            duration: started.elapsed(),
            truncated: false,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Resolve a configured script path.
///
/// The first existing candidate wins; if none exists the last candidate
/// is reported in [`ScriptError::NotFound`].
pub fn resolve_script_path(
    path: &str,
    cwd: Option<&Path>,
    exe_dir: Option<&Path>,
) -> Result<PathBuf, ScriptError> {
    let requested = Path::new(path);

    let resolved = if requested.is_absolute() {
        requested.to_path_buf()
    } else if let Some(candidate) = cwd.map(|d| d.join(requested)).filter(|p| p.exists()) {
        candidate
    } else if let Some(dir) = exe_dir {
        dir.join(requested)
    } else {
        requested.to_path_buf()
    };

    if resolved.is_file() {
        Ok(resolved)
    } else {
        Err(ScriptError::NotFound { path: resolved })
    }
}

/// Executes control scripts under a timeout
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    config: RunnerConfig,
}

impl ScriptRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Resolve against the current working directory and executable directory
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ScriptError> {
        let cwd = std::env::current_dir().ok();
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        resolve_script_path(path, cwd.as_deref(), exe_dir.as_deref())
    }

    /// Run `path` with `action` as its only argument.
    ///
    /// `action` is passed through unchecked; callers validate it.
    pub async fn run(&self, path: &str, action: &str) -> ExecutionResult {
        let started = Instant::now();
        debug!(path, action, "Executing script");

        if path.is_empty() {
            let err = ScriptError::EmptyPath {
                action: action.to_string(),
            };
            error!(action, error = %err, "Script not configured");
            return ExecutionResult::failed(err, started);
        }

        let resolved = match self.resolve(path) {
            Ok(resolved) => resolved,
            Err(err) => {
                if let ScriptError::NotFound { path: candidate } = &err {
                    error!(path, candidate = %candidate.display(), action, "Script not found");
                }
                return ExecutionResult::failed(err, started);
            }
        };
        debug!(resolved = %resolved.display(), "Resolved script path");

        let mut cmd = Command::new(&resolved);
        cmd.arg(action)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = resolved.parent() {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(path = %resolved.display(), action, error = %e, "Failed to spawn script");
                return ExecutionResult::failed(ScriptError::Spawn(e), started);
            }
        };
        // armed until the script has been reaped; covers a dropped future
        let mut group = GroupKill::new(child.id());

        let stdout = Capture::start(child.stdout.take(), self.config.max_output_bytes);
        let stderr = Capture::start(child.stderr.take(), self.config.max_output_bytes);

        let error = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                group.disarm();
                if status.success() {
                    None
                } else {
                    Some(ScriptError::Exit(status))
                }
            }
            Ok(Err(e)) => {
                group.fire();
                Some(ScriptError::Wait(e))
            }
            Err(_) => {
                terminate(&mut child, &mut group).await;
                Some(ScriptError::Timeout {
                    timeout: self.config.timeout,
                })
            }
        };

        let (out, err) = tokio::join!(stdout.finish(DRAIN_GRACE), stderr.finish(DRAIN_GRACE));
        let mut combined = out.bytes;
        combined.extend_from_slice(&err.bytes);

        let result = ExecutionResult {
            output: String::from_utf8_lossy(&combined).into_owned(),
            duration: started.elapsed(),
            truncated: out.truncated || err.truncated,
            error,
        };

        match &result.error {
            None => {
                info!(
                    path = %resolved.display(),
                    action,
                    duration_ms = result.duration.as_millis() as u64,
                    "Script executed successfully"
                );
                debug!(output = %result.output, "Script output");
            }
            Some(e) => {
                error!(
                    path = %resolved.display(),
                    action,
                    kind = e.kind(),
                    duration_ms = result.duration.as_millis() as u64,
                    error = %e,
                    output = %result.output,
                    "Script execution failed"
                );
            }
        }

        result
    }
}

/// Kill the script and everything it started, then reap it
async fn terminate(child: &mut Child, group: &mut GroupKill) {
    group.fire();
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill timed out script");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // the child was spawned as leader of its own group, so pgid == pid
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Kills the script's process group when fired or dropped while armed
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn fire(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            debug!(pgid, "Script run abandoned, killing process group");
        }
        self.fire();
    }
}

#[derive(Debug, Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Background reader for one output pipe
struct Capture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(reader: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let task = reader.map(|mut reader| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut buf = buffer.lock();
                            let room = limit.saturating_sub(buf.bytes.len());
                            if n > room {
                                buf.truncated = true;
                            }
                            buf.bytes.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                }
            })
        });
        Self { buffer, task }
    }

    /// Wait for EOF (bounded by `grace`) and take what was read
    async fn finish(mut self, grace: Duration) -> CaptureBuffer {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }
        std::mem::take(&mut *self.buffer.lock())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn runner(timeout: Duration) -> ScriptRunner {
        ScriptRunner::new(RunnerConfig {
            timeout,
            ..Default::default()
        })
    }

    /// Running and not a zombie waiting for a reaper
    fn process_alive(pid: i32) -> bool {
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // state follows the parenthesised command name
            Ok(stat) => stat
                .rsplit_once(") ")
                .map_or(true, |(_, rest)| !rest.starts_with('Z')),
            Err(_) => !Path::new("/proc/self").exists(),
        }
    }

    async fn wait_until_dead(pid: i32) -> bool {
        for _ in 0..40 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn read_pid(path: &Path) -> i32 {
        std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
    }

    #[test]
    fn test_resolve_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "abs.sh", "true");
        let resolved = resolve_script_path(script.to_str().unwrap(), None, None).unwrap();
        assert_eq!(resolved, script);
    }

    #[test]
    fn test_resolve_prefers_working_directory() {
        let cwd = tempfile::tempdir().unwrap();
        let exe = tempfile::tempdir().unwrap();
        let in_cwd = write_script(cwd.path(), "both.sh", "true");
        write_script(exe.path(), "both.sh", "true");

        let resolved = resolve_script_path("both.sh", Some(cwd.path()), Some(exe.path())).unwrap();
        assert_eq!(resolved, in_cwd);
    }

    #[test]
    fn test_resolve_falls_back_to_executable_directory() {
        let cwd = tempfile::tempdir().unwrap();
        let exe = tempfile::tempdir().unwrap();
        let in_exe = write_script(exe.path(), "only-exe.sh", "true");

        let resolved =
            resolve_script_path("only-exe.sh", Some(cwd.path()), Some(exe.path())).unwrap();
        assert_eq!(resolved, in_exe);
    }

    #[test]
    fn test_resolve_missing_everywhere() {
        let cwd = tempfile::tempdir().unwrap();
        let exe = tempfile::tempdir().unwrap();

        let err = resolve_script_path("ghost.sh", Some(cwd.path()), Some(exe.path())).unwrap_err();
        match err {
            ScriptError::NotFound { path } => assert_eq!(path, exe.path().join("ghost.sh")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_script_path(dir.path().to_str().unwrap(), None, None).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_empty_path_is_not_configured() {
        let result = runner(Duration::from_secs(5)).run("", "enable").await;
        assert!(matches!(result.error, Some(ScriptError::EmptyPath { .. })));
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_missing_script_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.sh");

        let result = runner(Duration::from_secs(5))
            .run(missing.to_str().unwrap(), "enable")
            .await;
        assert!(matches!(result.error, Some(ScriptError::NotFound { .. })));
        assert_eq!(result.error.unwrap().to_string(), "script not found");
    }

    #[tokio::test]
    async fn test_success_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "echo \"action=$1\"\necho warn >&2");

        let result = runner(Duration::from_secs(10))
            .run(script.to_str().unwrap(), "enable")
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.output, "action=enable\nwarn\n");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_runs_in_script_directory() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "where.sh", "pwd -P");

        let result = runner(Duration::from_secs(10))
            .run(script.to_str().unwrap(), "disable")
            .await;
        assert!(result.is_success());
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(result.output.trim()), expected);
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo partial work\nexit 3");

        let result = runner(Duration::from_secs(10))
            .run(script.to_str().unwrap(), "enable")
            .await;
        match &result.error {
            Some(ScriptError::Exit(status)) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(result.output, "partial work\n");
        assert_eq!(result.error.as_ref().unwrap().kind(), "execution_failed");
    }

    #[tokio::test]
    async fn test_non_executable_file_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "not a program").unwrap();

        let result = runner(Duration::from_secs(5))
            .run(path.to_str().unwrap(), "enable")
            .await;
        assert!(matches!(result.error, Some(ScriptError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_timeout_kills_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "slow.sh",
            "echo started\necho $$ > pid\nexec sleep 30",
        );

        let started = Instant::now();
        let result = runner(Duration::from_millis(500))
            .run(script.to_str().unwrap(), "enable")
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        let err = result.error.expect("should time out");
        assert!(err.is_timeout());
        assert!(err.to_string().contains("500ms"));
        assert_eq!(result.output, "started\n");

        let pid = read_pid(&dir.path().join("pid"));
        assert!(!process_alive(pid), "script process {pid} still running");
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        // the background sleep keeps stdout open; without a group kill the
        // capture would hang until the drain grace expires
        let script = write_script(dir.path(), "forks.sh", "sleep 30 &\necho $! > bgpid\nsleep 30");

        let started = Instant::now();
        let result = runner(Duration::from_millis(300))
            .run(script.to_str().unwrap(), "enable")
            .await;

        assert!(result.error.as_ref().is_some_and(ScriptError::is_timeout));
        assert!(started.elapsed() < DRAIN_GRACE);

        let bg_pid = read_pid(&dir.path().join("bgpid"));
        assert!(wait_until_dead(bg_pid).await, "background child {bg_pid} still running");
    }

    #[tokio::test]
    async fn test_cancelled_run_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "cancel.sh", "sleep 30 &\necho $! > bgpid\nsleep 30");

        let cancelled = tokio::time::timeout(
            Duration::from_millis(500),
            runner(Duration::from_secs(10)).run(script.to_str().unwrap(), "enable"),
        )
        .await;
        assert!(cancelled.is_err());

        let bg_pid = read_pid(&dir.path().join("bgpid"));
        assert!(
            wait_until_dead(bg_pid).await,
            "background child {bg_pid} outlived the cancelled run"
        );
    }

    #[tokio::test]
    async fn test_clean_exit_leaves_detached_children_alone() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "detach.sh",
            "sleep 30 >/dev/null 2>&1 &\necho $! > bgpid\necho done",
        );

        let result = runner(Duration::from_secs(10))
            .run(script.to_str().unwrap(), "enable")
            .await;
        assert!(result.is_success());
        assert_eq!(result.output, "done\n");

        let bg_pid = read_pid(&dir.path().join("bgpid"));
        assert!(process_alive(bg_pid));
        unsafe { libc::kill(bg_pid, libc::SIGKILL) };
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "chatty.sh",
            "i=0\nwhile [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done",
        );

        let result = ScriptRunner::new(RunnerConfig {
            timeout: Duration::from_secs(10),
            max_output_bytes: 64,
        })
        .run(script.to_str().unwrap(), "enable")
        .await;

        assert!(result.is_success());
        assert!(result.truncated);
        assert_eq!(result.output.len(), 64);
    }
}
