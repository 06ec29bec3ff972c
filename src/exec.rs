//! C2 — Process Executor: spawns child processes with logging, timing,
//! timeout, retry, and output capture (§4.2).
//!
//! Grounded on the teacher's `src/orchestrator/runner.rs::run_iteration`:
//! same `tokio::process::Command` + piped stdio + line-by-line console
//! streaming + `child.wait()` shape, generalized from "one Claude CLI
//! invocation" to "any external command" and paired with the teacher's
//! `fs2`-backed advisory lock idea (unused in the teacher, put to work here
//! as §4.2's `lock`).

use crate::errors::ExecError;
use crate::report::{ItemStatus, MetricOp, Report};
use crate::util::format_duration;
use console::style;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// "Timed out" exit code shared by every timeout path in the system (§4.2,
/// §6.1).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, Default)]
pub struct Executor {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn build_command(&self, cmd: &str, args: &[&str]) -> Command {
        let mut command = Command::new(cmd);
        command.args(args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &self.env {
            command.env(k, v);
        }
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command
    }

    /// Pure output capture, no logging, no report tracking.
    pub async fn capture(&self, cmd: &str, args: &[&str]) -> Result<(Vec<u8>, i32), ExecError> {
        let output = self
            .build_command(cmd, args)
            .output()
            .await
            .map_err(|source| ExecError::SpawnFailed {
                cmd: cmd.to_string(),
                source,
            })?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok((combined, output.status.code().unwrap_or(-1)))
    }

    /// As `capture`, but bounded by a wall-clock limit; on expiry the child
    /// is terminated via [`terminate_then_kill`] and the output collected so
    /// far is discarded in favor of [`TIMEOUT_EXIT_CODE`].
    pub async fn capture_with_timeout(
        &self,
        seconds: u64,
        cmd: &str,
        args: &[&str],
    ) -> Result<(Vec<u8>, i32), ExecError> {
        let mut child = self
            .build_command(cmd, args)
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                cmd: cmd.to_string(),
                source,
            })?;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let child_ref = &mut child;

        let run = async move {
            let mut out = Vec::new();
            if let Some(s) = stdout.as_mut() {
                let _ = tokio::io::AsyncReadExt::read_to_end(s, &mut out).await;
            }
            if let Some(s) = stderr.as_mut() {
                let _ = tokio::io::AsyncReadExt::read_to_end(s, &mut out).await;
            }
            let status = child_ref.wait().await;
            (out, status)
        };

        match tokio::time::timeout(Duration::from_secs(seconds), run).await {
            Ok((out, Ok(status))) => Ok((out, status.code().unwrap_or(-1))),
            Ok((_out, Err(source))) => Err(ExecError::SpawnFailed {
                cmd: cmd.to_string(),
                source,
            }),
            Err(_) => {
                terminate_then_kill(&mut child).await;
                Ok((Vec::new(), TIMEOUT_EXIT_CODE))
            }
        }
    }

    /// Spawns `cmd`, streams combined stdout+stderr to the console with a
    /// 2-space indent, and tracks a step through the Report's graceful
    /// wrappers.
    pub async fn exec_logged(
        &self,
        report: &mut Option<Report>,
        desc: &str,
        cmd: &str,
        args: &[&str],
    ) -> Result<i32, ExecError> {
        let step_idx = crate::report::track::step(report, desc);
        let started = Instant::now();
        let mut child = self
            .build_command(cmd, args)
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                cmd: cmd.to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("  {line}");
            }
        }
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("  {}", style(line).red());
            }
        }

        let status = child.wait().await.map_err(|source| ExecError::SpawnFailed {
            cmd: cmd.to_string(),
            source,
        })?;
        let exit_code = status.code().unwrap_or(-1);
        let elapsed = started.elapsed();
        println!(
            "{} {desc} finished in {} (exit {exit_code})",
            if exit_code == 0 { style("done").green() } else { style("fail").red() },
            format_duration(elapsed)
        );
        if let (Some(r), Some(idx)) = (report.as_mut(), step_idx) {
            r.step_done_at(idx, exit_code, None);
        }
        Ok(exit_code)
    }

    /// As `exec_logged` but redirects child output to `logfile` instead of
    /// the console.
    pub async fn exec_logged_to_file(
        &self,
        report: &mut Option<Report>,
        desc: &str,
        logfile: &Path,
        cmd: &str,
        args: &[&str],
    ) -> Result<i32, ExecError> {
        let step_idx = crate::report::track::step(report, desc);
        let started = Instant::now();
        let output = self
            .build_command(cmd, args)
            .output()
            .await
            .map_err(|source| ExecError::SpawnFailed {
                cmd: cmd.to_string(),
                source,
            })?;

        let mut combined = output.stdout.clone();
        combined.extend_from_slice(&output.stderr);
        if let Some(parent) = logfile.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        std::fs::write(logfile, &combined).map_err(|source| ExecError::LogWriteFailed {
            path: logfile.to_path_buf(),
            source,
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        println!(
            "{desc} finished in {} (exit {exit_code}), log: {}",
            format_duration(started.elapsed()),
            logfile.display()
        );
        if let (Some(r), Some(idx)) = (report.as_mut(), step_idx) {
            r.step_done_at(idx, exit_code, Some(logfile.display().to_string()));
        }
        Ok(exit_code)
    }

    /// Captures output; on success discards it; on failure, emits the full
    /// captured output to stderr.
    pub async fn exec_silent(
        &self,
        report: &mut Option<Report>,
        desc: &str,
        cmd: &str,
        args: &[&str],
    ) -> Result<i32, ExecError> {
        let step_idx = crate::report::track::step(report, desc);
        let (output, exit_code) = self.capture(cmd, args).await?;
        if exit_code != 0 {
            eprintln!("{}", String::from_utf8_lossy(&output));
        }
        if let (Some(r), Some(idx)) = (report.as_mut(), step_idx) {
            r.step_done_at(idx, exit_code, None);
        }
        Ok(exit_code)
    }

    /// Exponential backoff: delay doubles after each failed attempt, no
    /// retry on success. Returns the exit code of the last attempt.
    pub async fn retry(
        &self,
        max_attempts: u32,
        initial_delay: Duration,
        cmd: &str,
        args: &[&str],
    ) -> Result<i32, ExecError> {
        let mut delay = initial_delay;
        let mut last_code = -1;
        for attempt in 1..=max_attempts.max(1) {
            let (_, code) = self.capture(cmd, args).await?;
            last_code = code;
            if code == 0 {
                return Ok(0);
            }
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Ok(last_code)
    }

    /// Runs with a wall-clock limit; on expiry sends terminate, waits up to
    /// 5 seconds, then kill. Exit code 124 specifically means "timed out".
    pub async fn timeout(
        &self,
        seconds: u64,
        cmd: &str,
        args: &[&str],
    ) -> Result<i32, ExecError> {
        let mut child = self
            .build_command(cmd, args)
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                cmd: cmd.to_string(),
                source,
            })?;

        match tokio::time::timeout(Duration::from_secs(seconds), child.wait()).await {
            Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
            Ok(Err(source)) => Err(ExecError::SpawnFailed {
                cmd: cmd.to_string(),
                source,
            }),
            Err(_) => {
                terminate_then_kill(&mut child).await;
                Ok(TIMEOUT_EXIT_CODE)
            }
        }
    }
}

/// SIGTERM, wait up to 5s, then SIGKILL — the cancellation sequence used
/// everywhere in §4.2/§4.5/§5.
pub async fn terminate_then_kill(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        unsafe {
            libc_kill(pid as i32, 15);
        }
        let waited = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        if waited.is_err() {
            #[cfg(unix)]
            unsafe {
                libc_kill(pid as i32, 9);
            }
            let _ = child.wait().await;
        }
    } else {
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    unsafe extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    unsafe {
        kill(pid, sig);
    }
}

/// A process-wide advisory lock file recording the holder's pid, released
/// on drop (§4.2, §5).
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

/// Acquires the lock at `path`: if the file exists and its recorded pid is
/// alive, fails; otherwise writes its own pid. Stale locks pointing at a
/// dead pid are reaped automatically (§5).
pub fn lock(path: &Path) -> Result<LockGuard, ExecError> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if let Ok(pid) = existing.trim().parse::<u32>() {
            if pid_alive(pid) {
                return Err(ExecError::LockHeld {
                    path: path.to_path_buf(),
                    pid,
                });
            }
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    std::fs::write(path, std::process::id().to_string()).map_err(|source| {
        ExecError::LogWriteFailed {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(LockGuard {
        path: path.to_path_buf(),
    })
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

/// Used by components that need to record item-level exec outcomes (e.g.
/// Data Pump per-job results) without opening their own step.
pub fn track_item(report: &mut Option<Report>, status: ItemStatus, name: &str, detail: Option<String>) {
    crate::report::track::item(report, status, name, detail);
}

pub fn track_metric(report: &mut Option<Report>, key: &str, value: i64, op: MetricOp) {
    crate::report::track::metric(report, key, value, op);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_returns_exit_code_and_output() {
        let exec = Executor::new();
        let (out, code) = exec.capture("sh", &["-c", "echo hello; exit 3"]).await.unwrap();
        assert_eq!(code, 3);
        assert!(String::from_utf8_lossy(&out).contains("hello"));
    }

    #[tokio::test]
    async fn retry_stops_on_first_success() {
        let exec = Executor::new();
        let code = exec
            .retry(3, Duration::from_millis(1), "sh", &["-c", "exit 0"])
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn retry_returns_last_attempt_code_after_exhaustion() {
        let exec = Executor::new();
        let code = exec
            .retry(2, Duration::from_millis(1), "sh", &["-c", "exit 7"])
            .await
            .unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn timeout_returns_124_on_expiry() {
        let exec = Executor::new();
        let code = exec.timeout(1, "sleep", &["5"]).await.unwrap();
        assert_eq!(code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn timeout_returns_real_exit_code_when_fast_enough() {
        let exec = Executor::new();
        let code = exec.timeout(5, "sh", &["-c", "exit 0"]).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn capture_with_timeout_returns_output_when_fast_enough() {
        let exec = Executor::new();
        let (out, code) = exec
            .capture_with_timeout(5, "sh", &["-c", "echo hi; exit 0"])
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert!(String::from_utf8_lossy(&out).contains("hi"));
    }

    #[tokio::test]
    async fn capture_with_timeout_kills_child_and_reports_124_on_expiry() {
        let exec = Executor::new();
        let (out, code) = exec
            .capture_with_timeout(1, "sleep", &["5"])
            .await
            .unwrap();
        assert_eq!(code, TIMEOUT_EXIT_CODE);
        assert!(out.is_empty());
    }

    #[test]
    fn lock_rejects_second_holder_while_first_pid_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restore_ORCL.lock");
        let guard = lock(&path).unwrap();
        let err = lock(&path).unwrap_err();
        assert!(matches!(err, ExecError::LockHeld { .. }));
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn lock_reaps_stale_lock_with_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restore_ORCL.lock");
        std::fs::write(&path, "999999999").unwrap();
        let guard = lock(&path);
        assert!(guard.is_ok());
    }
}
