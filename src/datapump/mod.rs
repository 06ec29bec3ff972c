//! C5 — Data Pump Worker Pool: bounded-concurrency `expdp`/`impdp` job
//! execution with ready-file coordination and per-job monitoring (§4.5).
//!
//! Grounded on the teacher's `dag::executor`'s `Arc<Semaphore>` + `mpsc`
//! bounded-concurrency pattern (there: parallel plan-node execution; here:
//! parallel OS child processes instead of in-process tasks) and C2's
//! `terminate_then_kill` for the shared SIGTERM→SIGKILL cancellation
//! sequence.

use crate::errors::DataPumpError;
use crate::exec::terminate_then_kill;
use crate::report::{MetricOp, Report};
use crate::sql::{Connection, SqlGateway};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Export,
    Import,
    ImportDumpfile,
    ImportNetworkLink,
}

fn query_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)QUERY=.*?"\s*\n?"#).unwrap())
}

fn stripped_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(QUERY=|FLASHBACK_SCN=|NETWORK_LINK=)").unwrap())
}

/// Produces an effective parfile for `mode`/`metadata_only`; returns
/// `(path, owned_by_caller)` so the caller knows whether to delete it
/// afterward (§4.5 "Parfile preparation").
pub fn prepare_parfile(
    parfile: &Path,
    mode: JobMode,
    metadata_only: bool,
) -> Result<(PathBuf, bool), DataPumpError> {
    let original = std::fs::read_to_string(parfile).map_err(|e| DataPumpError::Other(e.into()))?;
    let mut needs_rewrite = false;
    let mut content = original.clone();

    if metadata_only {
        content = query_block_regex().replace_all(&content, "").to_string();
        needs_rewrite = true;
    }

    if mode == JobMode::ImportDumpfile {
        let filtered: String = content
            .lines()
            .filter(|line| !stripped_line_regex().is_match(line))
            .map(|line| format!("{line}\n"))
            .collect();
        content = filtered;
        needs_rewrite = true;
    }

    if !needs_rewrite {
        return Ok((parfile.to_path_buf(), false));
    }

    let tmp = tempfile::Builder::new()
        .prefix("datapump_")
        .suffix(".par")
        .tempfile()
        .map_err(|e| DataPumpError::Other(e.into()))?;
    let (mut file, path) = tmp
        .keep()
        .map_err(|e| DataPumpError::Other(anyhow::anyhow!(e.to_string())))?;
    use std::io::Write as _;
    file.write_all(content.as_bytes())
        .map_err(|e| DataPumpError::Other(e.into()))?;
    Ok((path, true))
}

/// `SELECT CURRENT_SCN FROM V$DATABASE@<network_link>`, falling back to an
/// operator-supplied SCN if the remote query fails (§4.5 "SCN
/// acquisition").
pub async fn get_scn(
    conn: &Connection,
    network_link: &str,
    fallback: Option<u64>,
) -> Result<u64, DataPumpError> {
    let sql = format!("SELECT CURRENT_SCN FROM V$DATABASE@{network_link}");
    match SqlGateway::query(conn, &sql).await {
        Ok(out) => out.trim().parse::<u64>().map_err(|_| match fallback {
            Some(scn) => {
                eprintln!("warning: SCN query returned non-numeric output, using fallback {scn}");
                DataPumpError::NoScn
            }
            None => DataPumpError::NoScn,
        }),
        Err(e) => match fallback {
            Some(scn) => {
                eprintln!("warning: SCN query failed ({e}), using fallback {scn}");
                Ok(scn)
            }
            None => Err(DataPumpError::NoScn),
        },
    }
}

/// Classifies `<table>|<size_mb>` rows into "ants" (< `ant_mb`) and
/// "elephants" (everything else) (§4.5 "Table categorization").
pub fn categorize_tables(
    rows_file: &Path,
    ant_mb: &str,
    elephant_mb: &str,
) -> Result<(Vec<String>, Vec<String>), DataPumpError> {
    let ant_threshold: f64 = ant_mb
        .parse()
        .map_err(|_| DataPumpError::NonNumericThreshold(ant_mb.to_string()))?;
    let _elephant_threshold: f64 = elephant_mb
        .parse()
        .map_err(|_| DataPumpError::NonNumericThreshold(elephant_mb.to_string()))?;

    let text = std::fs::read_to_string(rows_file).map_err(|e| DataPumpError::Other(e.into()))?;
    let mut ants = Vec::new();
    let mut elephants = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((table, size_s)) = line.split_once('|') {
            let size: f64 = size_s.trim().parse().unwrap_or(f64::MAX);
            if size < ant_threshold {
                ants.push(table.to_string());
            } else {
                elephants.push(table.to_string());
            }
        }
    }
    Ok((ants, elephants))
}

#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    pub label: String,
    pub parfile: PathBuf,
    pub logfile: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    Kill,
    Log,
    Both,
}

pub struct MonitorConfig {
    pub check_interval_secs: u64,
    pub progress_every_secs: u64,
    pub timeout_minutes: u64,
    pub action: TimeoutAction,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            progress_every_secs: 300,
            timeout_minutes: 0,
            action: TimeoutAction::Kill,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub index: usize,
    pub label: String,
    pub exit_code: i32,
    pub duration_secs: u64,
}

/// Spawns one Data Pump child (`impdp`/`expdp parfile=...`), polling it per
/// `monitor` and enforcing the timeout action if it overruns (§4.5
/// "Per-job monitoring").
async fn run_one_job(
    program: &str,
    job: &Job,
    monitor: &MonitorConfig,
) -> Result<JobOutcome, DataPumpError> {
    let started = Instant::now();
    let mut child = tokio::process::Command::new(program)
        .arg(format!("parfile={}", job.parfile.display()))
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|source| crate::errors::ExecError::SpawnFailed {
            cmd: program.to_string(),
            source,
        })?;

    let mut last_progress_log = Instant::now();
    let timeout_limit = if monitor.timeout_minutes > 0 {
        Some(Duration::from_secs(monitor.timeout_minutes * 60))
    } else {
        None
    };

    loop {
        if let Some(status) = child.try_wait().map_err(|source| crate::errors::ExecError::SpawnFailed {
            cmd: program.to_string(),
            source,
        })? {
            let exit_code = status.code().unwrap_or(-1);
            let _ = save_job_log(job, &mut child).await;
            return Ok(JobOutcome {
                index: job.index,
                label: job.label.clone(),
                exit_code,
                duration_secs: started.elapsed().as_secs(),
            });
        }

        if let Some(limit) = timeout_limit {
            if started.elapsed() >= limit {
                if matches!(monitor.action, TimeoutAction::Kill | TimeoutAction::Both) {
                    terminate_then_kill(&mut child).await;
                }
                return Err(DataPumpError::JobTimedOut {
                    job: job.label.clone(),
                    minutes: monitor.timeout_minutes,
                });
            }
        }

        if last_progress_log.elapsed() >= Duration::from_secs(monitor.progress_every_secs) {
            println!(
                "  job {} ({}) running {}s",
                job.index,
                job.label,
                started.elapsed().as_secs()
            );
            last_progress_log = Instant::now();
        }

        tokio::time::sleep(Duration::from_secs(monitor.check_interval_secs.min(5))).await;
    }
}

async fn save_job_log(job: &Job, child: &mut tokio::process::Child) -> std::io::Result<()> {
    use tokio::io::AsyncReadExt;
    let mut combined = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let _ = stdout.read_to_end(&mut combined).await;
    }
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_end(&mut combined).await;
    }
    if let Some(parent) = job.logfile.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    tokio::fs::write(&job.logfile, combined).await
}

/// Bounded-concurrency batch execution: at most `max_concurrent` children
/// in flight at once; returns `(total, success, failed)` (§3.5, §4.5
/// "Concurrent batch execution").
pub async fn run_parallel(
    report: &mut Option<Report>,
    program: &str,
    max_concurrent: usize,
    jobs: Vec<Job>,
    monitor: MonitorConfig,
) -> (usize, usize, usize) {
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let success = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let monitor = Arc::new(monitor);
    let program = Arc::new(program.to_string());

    let mut handles = Vec::new();
    for job in jobs {
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        let success = success.clone();
        let failed = failed.clone();
        let monitor = monitor.clone();
        let program = program.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let result = run_one_job(&program, &job, &monitor).await;
            match result {
                Ok(outcome) if outcome.exit_code == 0 => {
                    success.fetch_add(1, Ordering::SeqCst);
                    Some(outcome)
                }
                Ok(outcome) => {
                    failed.fetch_add(1, Ordering::SeqCst);
                    Some(outcome)
                }
                Err(_) => {
                    failed.fetch_add(1, Ordering::SeqCst);
                    None
                }
            }
        }));
    }

    for handle in handles {
        if let Ok(Some(outcome)) = handle.await {
            crate::report::track::metric(report, "dp_duration_secs", outcome.duration_secs as i64, MetricOp::Add);
        }
    }

    (total, success.load(Ordering::SeqCst), failed.load(Ordering::SeqCst))
}

/// `<dir>/<job>.READY` marker content (§3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStatus {
    Success,
    Failed,
}

fn ready_path(dir: &Path, job: &str) -> PathBuf {
    dir.join(format!("{job}.READY"))
}

pub async fn mark_ready(dir: &Path, job: &str, exit_code: i32) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await.ok();
    let status = if exit_code == 0 { "SUCCESS" } else { "FAILED" };
    let content = format!(
        "timestamp={}\nexit_code={exit_code}\nstatus={status}\n",
        chrono::Utc::now().timestamp()
    );
    let mut f = tokio::fs::File::create(ready_path(dir, job)).await?;
    f.write_all(content.as_bytes()).await
}

fn parse_ready_file(content: &str) -> Option<ReadyStatus> {
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("status=") {
            return match v.trim() {
                "SUCCESS" => Some(ReadyStatus::Success),
                "FAILED" => Some(ReadyStatus::Failed),
                _ => None,
            };
        }
    }
    None
}

/// Non-blocking check (§3.6).
pub async fn is_ready(dir: &Path, job: &str) -> Option<ReadyStatus> {
    let content = tokio::fs::read_to_string(ready_path(dir, job)).await.ok()?;
    parse_ready_file(&content)
}

/// Blocks, polling at `interval_s` (default 5s), until the ready file
/// appears (§3.6, §4.5 "Ready-file protocol").
pub async fn wait_ready(dir: &Path, job: &str, interval_s: u64) -> ReadyStatus {
    loop {
        if let Some(status) = is_ready(dir, job).await {
            return status;
        }
        tokio::time::sleep(Duration::from_secs(interval_s.max(1))).await;
    }
}

/// Harvests the metrics described in §4.5 "Metrics" from one job's
/// captured log text.
pub struct JobMetrics {
    pub rows_imported: u64,
    pub throughput_mbps: f64,
    pub tables_processed: u64,
    pub has_errors: bool,
}

pub fn harvest_metrics(log_text: &str, duration_secs: u64) -> JobMetrics {
    static ROWS_RE: OnceLock<Regex> = OnceLock::new();
    static BYTES_RE: OnceLock<Regex> = OnceLock::new();
    static TABLE_RE: OnceLock<Regex> = OnceLock::new();
    let rows_re = ROWS_RE.get_or_init(|| Regex::new(r"(\d+)(?= rows)").unwrap());
    let bytes_re = BYTES_RE.get_or_init(|| Regex::new(r"(\d+)(?= bytes)").unwrap());
    let table_re = TABLE_RE.get_or_init(|| Regex::new(r#"Table ""#).unwrap());

    let rows_imported: u64 = rows_re
        .captures_iter(log_text)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .sum();
    let last_bytes: u64 = bytes_re
        .captures_iter(log_text)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .last()
        .unwrap_or(0);
    let throughput_mbps = if duration_secs > 0 {
        (last_bytes as f64 / 1_000_000.0) / duration_secs as f64
    } else {
        0.0
    };
    let tables_processed = table_re.find_iter(log_text).count() as u64;
    let has_errors = log_text.lines().any(|l| l.contains("ORA-"));

    JobMetrics {
        rows_imported,
        throughput_mbps,
        tables_processed,
        has_errors,
    }
}

/// Records a batch's metrics through C1's accumulation rules (§4.5
/// "Metrics").
pub fn record_batch_metrics(report: &mut Option<Report>, metrics: &[JobMetrics], total: usize, success: usize, failed: usize) {
    for m in metrics {
        crate::report::track::metric(report, "dp_rows_imported", m.rows_imported as i64, MetricOp::Add);
        crate::report::track::metric(report, "dp_avg_throughput_mbps", m.throughput_mbps as i64, MetricOp::Max);
        crate::report::track::metric(report, "dp_tables_processed", m.tables_processed as i64, MetricOp::Add);
    }
    crate::report::track::metric(report, "dp_parfiles_total", total as i64, MetricOp::Set);
    crate::report::track::metric(report, "dp_parfiles_success", success as i64, MetricOp::Set);
    crate::report::track::metric(report, "dp_parfiles_failed", failed as i64, MetricOp::Set);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_tables_splits_on_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sizes.txt");
        std::fs::write(&path, "SMALL_TBL|10\nBIG_TBL|5000\nMED_TBL|500\n").unwrap();
        let (ants, elephants) = categorize_tables(&path, "100", "1000").unwrap();
        assert_eq!(ants, vec!["SMALL_TBL"]);
        assert_eq!(elephants, vec!["BIG_TBL", "MED_TBL"]);
    }

    #[test]
    fn categorize_tables_rejects_non_numeric_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sizes.txt");
        std::fs::write(&path, "T|1\n").unwrap();
        let err = categorize_tables(&path, "abc", "1000").unwrap_err();
        assert!(matches!(err, DataPumpError::NonNumericThreshold(_)));
    }

    #[test]
    fn prepare_parfile_strips_query_block_when_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.par");
        std::fs::write(
            &path,
            "TABLES=FOO\nQUERY=FOO:\"WHERE 1=1\"\nDIRECTORY=DPDIR\n",
        )
        .unwrap();
        let (effective, owned) = prepare_parfile(&path, JobMode::Export, true).unwrap();
        assert!(owned);
        let content = std::fs::read_to_string(effective).unwrap();
        assert!(!content.contains("QUERY="));
        assert!(content.contains("DIRECTORY=DPDIR"));
    }

    #[test]
    fn prepare_parfile_strips_network_fields_for_import_dumpfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.par");
        std::fs::write(
            &path,
            "DIRECTORY=DPDIR\nNETWORK_LINK=REMOTE\nFLASHBACK_SCN=12345\n",
        )
        .unwrap();
        let (effective, owned) = prepare_parfile(&path, JobMode::ImportDumpfile, false).unwrap();
        assert!(owned);
        let content = std::fs::read_to_string(effective).unwrap();
        assert!(!content.contains("NETWORK_LINK"));
        assert!(!content.contains("FLASHBACK_SCN"));
    }

    #[test]
    fn prepare_parfile_returns_original_path_when_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.par");
        std::fs::write(&path, "DIRECTORY=DPDIR\n").unwrap();
        let (effective, owned) = prepare_parfile(&path, JobMode::Import, false).unwrap();
        assert!(!owned);
        assert_eq!(effective, path);
    }

    #[tokio::test]
    async fn ready_file_round_trips_through_mark_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        mark_ready(dir.path(), "job1", 0).await.unwrap();
        let status = wait_ready(dir.path(), "job1", 1).await;
        assert_eq!(status, ReadyStatus::Success);
    }

    #[tokio::test]
    async fn is_ready_returns_none_before_marker_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_ready(dir.path(), "missing").await.is_none());
    }

    #[test]
    fn harvest_metrics_counts_rows_and_tables() {
        let log = "10000 rows exported\nTable \"HR\".\"EMPLOYEES\" exported\n2000000 bytes\n";
        let m = harvest_metrics(log, 10);
        assert_eq!(m.rows_imported, 10000);
        assert_eq!(m.tables_processed, 1);
        assert!(!m.has_errors);
    }

    #[test]
    fn harvest_metrics_flags_errors() {
        let log = "ORA-39125: worker process failed\n";
        let m = harvest_metrics(log, 1);
        assert!(m.has_errors);
    }
}
