//! Child-process execution with a hard wall-clock limit.
//!
//! stdout and stderr are drained concurrently into bounded buffers so a
//! chatty candidate can neither block on a full pipe nor exhaust memory.
//! On unix the candidate leads its own process group, and the whole group
//! is killed once the run ends, however it ends.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::prompt::render::{char_len, truncate_chars_tail};

/// How long to wait for the pipes to close after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How the child finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Exited(ExitStatus),
    /// Killed at the wall-clock limit.
    TimedOut,
    SpawnFailed(String),
}

/// Result of one child-process run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    /// Merged stdout and stderr, bounded.
    pub output: String,
    pub elapsed: Duration,
}

/// Kills the candidate's process group when dropped or asked to.
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else { return };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // Nothing left in the group.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill candidate process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Keeps the last `limit` bytes written to it.
#[derive(Debug, Default)]
struct TailBuffer {
    bytes: Vec<u8>,
    limit: usize,
    dropped: bool,
}

impl TailBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.limit.saturating_mul(2).max(8192) {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
            self.dropped = true;
        }
    }

    fn text(&self) -> String {
        let start = self.bytes.len().saturating_sub(self.limit);
        let text = String::from_utf8_lossy(&self.bytes[start..]).into_owned();
        if self.dropped || start > 0 {
            format!("[truncated]...\n{text}")
        } else {
            text
        }
    }
}

type SharedBuffer = Arc<Mutex<TailBuffer>>;

fn spawn_drain<R>(reader: Option<R>, buffer: SharedBuffer) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = reader?;
    Some(tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.push(&chunk[..n]);
                    }
                }
            }
        }
    }))
}

async fn finish_drain(handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else { return };
    let abort = handle.abort_handle();
    if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
        // A grandchild still holds the pipe open.
        abort.abort();
    }
}

fn snapshot(buffer: &SharedBuffer) -> String {
    buffer.lock().map(|b| b.text()).unwrap_or_default()
}

/// Merge stdout and stderr within `limit` characters.
///
/// stderr keeps at least half the budget since tracebacks land there.
pub fn merge_output(stdout: &str, stderr: &str, limit: usize) -> String {
    let stdout = stdout.trim_end();
    let stderr = stderr.trim_end();
    let (out_len, err_len) = (char_len(stdout), char_len(stderr));
    if out_len + err_len + 1 <= limit {
        return match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (_, true) => stdout.to_string(),
            _ => format!("{stdout}\n{stderr}"),
        };
    }
    let err_budget = err_len.min(limit.saturating_sub(out_len.min(limit / 2) + 1));
    let out_budget = limit.saturating_sub(err_budget + 1);
    let stdout = truncate_chars_tail(stdout, out_budget);
    let stderr = truncate_chars_tail(stderr, err_budget);
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, _) => stderr,
        (_, true) => stdout,
        _ => format!("{stdout}\n{stderr}"),
    }
}

/// Run `argv` in `cwd` with a wall-clock `limit`.
///
/// On expiry the child and everything it started are killed. Leftover
/// descendants are also killed after a normal exit, and when this future
/// is dropped.
pub async fn run_command(
    argv: &[String],
    cwd: &Path,
    limit: Duration,
    output_limit_chars: usize,
) -> RunReport {
    let Some((program, args)) = argv.split_first() else {
        return RunReport {
            status: RunStatus::SpawnFailed("empty command".to_string()),
            output: String::new(),
            elapsed: Duration::ZERO,
        };
    };

    let start = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    let spawned = command.spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return RunReport {
                status: RunStatus::SpawnFailed(format!("failed to spawn {program}: {e}")),
                output: String::new(),
                elapsed: start.elapsed(),
            }
        }
    };
    let mut group = GroupKill { pgid: child.id() };
    debug!(
        program = %program,
        cwd = %cwd.display(),
        limit_secs = limit.as_secs_f64(),
        "candidate process spawned"
    );

    let new_buffer = || {
        Arc::new(Mutex::new(TailBuffer {
            limit: output_limit_chars.saturating_mul(4),
            ..TailBuffer::default()
        }))
    };
    let (out_buf, err_buf) = (new_buffer(), new_buffer());
    let out_task = spawn_drain(child.stdout.take(), out_buf.clone());
    let err_task = spawn_drain(child.stderr.take(), err_buf.clone());

    let status = match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) => RunStatus::Exited(status),
        Ok(Err(e)) => RunStatus::SpawnFailed(format!("failed to wait for {program}: {e}")),
        Err(_elapsed) => {
            group.kill();
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "failed to kill timed-out candidate");
            }
            RunStatus::TimedOut
        }
    };
    let elapsed = start.elapsed();
    // Background descendants would otherwise hold the pipes open.
    group.kill();

    tokio::join!(finish_drain(out_task), finish_drain(err_task));

    RunReport {
        status,
        output: merge_output(&snapshot(&out_buf), &snapshot(&err_buf), output_limit_chars),
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn exited_ok(report: &RunReport) -> bool {
        matches!(&report.status, RunStatus::Exited(s) if s.success())
    }

    /// Waits up to two seconds for `pid` to be gone or a zombie.
    #[cfg(target_os = "linux")]
    async fn process_gone(pid: &str) -> bool {
        for _ in 0..40 {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Err(_) => return true,
                Ok(stat) => {
                    let state = stat.rsplit(')').next().unwrap_or("").trim_start();
                    if state.starts_with('Z') {
                        return true;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[test]
    fn test_merge_output_fits() {
        assert_eq!(merge_output("out\n", "err\n", 100), "out\nerr");
        assert_eq!(merge_output("", "err", 100), "err");
        assert_eq!(merge_output("out", "", 100), "out");
    }

    #[test]
    fn test_merge_output_keeps_stderr_tail() {
        let stdout = "o".repeat(1_000);
        let stderr = format!("{}ZeroDivisionError", "e".repeat(1_000));
        let merged = merge_output(&stdout, &stderr, 200);
        assert!(char_len(&merged) <= 200);
        assert!(merged.ends_with("ZeroDivisionError"));
        assert!(merged.contains('o'));
    }

    #[test]
    fn test_tail_buffer_bounds_memory() {
        let mut buf = TailBuffer {
            limit: 10,
            ..TailBuffer::default()
        };
        for _ in 0..10_000 {
            buf.push(b"0123456789");
        }
        assert!(buf.bytes.len() <= 8192 + 10);
        assert!(buf.text().ends_with("0123456789"));
        assert!(buf.text().starts_with("[truncated]"));
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_command(
            &sh("echo to-stdout; echo to-stderr >&2"),
            dir.path(),
            Duration::from_secs(10),
            1_000,
        )
        .await;
        assert!(exited_ok(&report));
        assert!(report.output.contains("to-stdout"));
        assert!(report.output.contains("to-stderr"));
    }

    #[tokio::test]
    async fn test_runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let report =
            run_command(&sh("touch marker"), dir.path(), Duration::from_secs(10), 100).await;
        assert!(exited_ok(&report));
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_command(&sh("exit 7"), dir.path(), Duration::from_secs(10), 100).await;
        assert!(!exited_ok(&report));
        match report.status {
            RunStatus::Exited(status) => assert_eq!(status.code(), Some(7)),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_command(
            &sh("echo started; exec sleep 30"),
            dir.path(),
            Duration::from_millis(300),
            100,
        )
        .await;
        assert_eq!(report.status, RunStatus::TimedOut);
        assert!(report.elapsed < Duration::from_secs(10));
        assert!(report.output.contains("started"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let report = run_command(
            &sh("echo working; sleep 41.7 & echo $! > sleeper.pid; wait; true"),
            dir.path(),
            Duration::from_millis(300),
            100,
        )
        .await;
        assert_eq!(report.status, RunStatus::TimedOut);
        // Neither pipe is left waiting on the grace period.
        assert!(started.elapsed() < Duration::from_secs(3));

        let pid = std::fs::read_to_string(dir.path().join("sleeper.pid")).unwrap();
        assert!(process_gone(pid.trim()).await, "sleeper {} outlived the run", pid.trim());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_background_children_do_not_outlive_exit() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let report = run_command(
            &sh("sleep 42.3 & echo $! > sleeper.pid; echo done"),
            dir.path(),
            Duration::from_secs(10),
            100,
        )
        .await;
        assert!(exited_ok(&report));
        assert!(report.output.contains("done"));
        assert!(started.elapsed() < Duration::from_secs(3));

        let pid = std::fs::read_to_string(dir.path().join("sleeper.pid")).unwrap();
        assert!(process_gone(pid.trim()).await, "sleeper {} outlived the run", pid.trim());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_command(
            &["/nonexistent/interpreter".to_string()],
            dir.path(),
            Duration::from_secs(1),
            100,
        )
        .await;
        assert!(matches!(report.status, RunStatus::SpawnFailed(_)));

        let report = run_command(&[], dir.path(), Duration::from_secs(1), 100).await;
        assert!(matches!(report.status, RunStatus::SpawnFailed(_)));
    }
}
