//! C1 — Report Kernel: the single source of truth for what the orchestrator
//! did and when (§4.1).
//!
//! Grounded on the teacher's `src/audit/mod.rs` (`AuditRun`/`PhaseAudit`
//! ownership and JSON round-trip shape) for the persistence half and
//! `src/ui/progress.rs` (`OrchestratorUI`, styled console output, colored
//! durations) for the live-rendering half. The teacher's logger *errors*
//! when mutated without an active run; here the strict core (`Report`)
//! keeps that behavior and a graceful `track_*` layer on top makes every
//! verb a no-op when no `Report` has been initialized, per §4.1's
//! "graceful wrappers" paragraph.

pub mod render;

use chrono::{DateTime, Utc};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::collections::BTreeMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Success,
    SuccessWithWarnings,
    Failed,
}

impl StepStatus {
    pub fn is_failed(self) -> bool {
        matches!(self, StepStatus::Failed)
    }

    pub fn icon(self) -> &'static str {
        match self {
            StepStatus::Pending => "…",
            StepStatus::Success => "✅",
            StepStatus::SuccessWithWarnings => "⚠️",
            StepStatus::Failed => "❌",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Ok,
    Fail,
    Skip,
    Warn,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Ok => "ok",
            ItemStatus::Fail => "fail",
            ItemStatus::Skip => "skip",
            ItemStatus::Warn => "warn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricOp {
    Set,
    Add,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    Confirm,
    Retype,
    Select,
}

#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub start: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub phase_index: usize,
    pub name: String,
    pub status: StepStatus,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub step_index: usize,
    pub status: ItemStatus,
    pub name: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Confirmation {
    pub step_index: Option<usize>,
    pub kind: ConfirmKind,
    pub prompt: String,
    pub outcome: String,
}

#[derive(Debug, Default, Clone)]
pub struct Totals {
    pub phases: usize,
    pub steps_success: usize,
    pub steps_failed: usize,
    pub steps_pending: usize,
    pub items_ok: usize,
    pub items_fail: usize,
    pub items_skip: usize,
    pub items_warn: usize,
    pub elapsed_secs: i64,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

/// Module-metric prefixes the finalize pass groups into named subsections
/// (§4.1 "Module sections").
pub const MODULE_PREFIXES: &[(&str, &str)] = &[
    ("dp_", "Data Pump Operations"),
    ("sql_", "SQL Operations"),
    ("rman_", "RMAN Operations"),
    ("instance_", "Instance Operations"),
    ("env_", "Environment"),
    ("config_", "Configuration"),
    ("cluster_", "Cluster"),
];

pub struct Report {
    pub title: String,
    pub session_id: String,
    pub output_dir: PathBuf,
    pub start_time: DateTime<Utc>,
    pub meta: BTreeMap<String, String>,
    pub phases: Vec<Phase>,
    pub steps: Vec<Step>,
    pub items: Vec<Item>,
    pub metrics: BTreeMap<String, i64>,
    pub confirmations: Vec<Confirmation>,
    finalized: bool,
    auto_yes: bool,
    auto_no: bool,
}

fn mask_if_secret(key: &str, value: &str) -> String {
    let upper = key.to_uppercase();
    if upper.contains("PASSWORD") || upper.contains("SECRET") {
        "********".to_string()
    } else {
        value.to_string()
    }
}

impl Report {
    /// `init(title, output_dir, session_id)` — establishes a new Report,
    /// ensures the output dir exists. Session id defaults to
    /// `YYYYMMDD_HHMMSS` (§4.1).
    pub fn init(
        title: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        session_id: Option<String>,
    ) -> anyhow::Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        let session_id =
            session_id.unwrap_or_else(|| Utc::now().format("%Y%m%d_%H%M%S").to_string());
        Ok(Self {
            title: title.into(),
            session_id,
            output_dir,
            start_time: Utc::now(),
            meta: BTreeMap::new(),
            phases: Vec::new(),
            steps: Vec::new(),
            items: Vec::new(),
            metrics: BTreeMap::new(),
            confirmations: Vec::new(),
            finalized: false,
            auto_yes: std::env::var("AUTO_YES").as_deref() == Ok("1"),
            auto_no: std::env::var("AUTO_NO").as_deref() == Ok("1"),
        })
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.insert(key.into(), value.into());
    }

    pub fn phase(&mut self, name: impl Into<String>) {
        let name = name.into();
        println!();
        println!("{}", style("═".repeat(70)).cyan());
        println!("{} {}", style("▶").green().bold(), style(&name).yellow().bold());
        println!("{}", style("═".repeat(70)).cyan());
        self.phases.push(Phase {
            name,
            start: Utc::now(),
        });
    }

    /// Cosmetic subdivision: printed to console, carries no report state.
    pub fn section(&self, title: &str) {
        println!("{}", style(format!("— {title} —")).dim());
    }

    pub fn step(&mut self, name: impl Into<String>) -> usize {
        let phase_index = self.phases.len().saturating_sub(1);
        let idx = self.steps.len();
        let name = name.into();
        println!(
            "{} [{}] {}",
            style(format!("#{}", idx + 1)).bold().dim(),
            style("step").dim(),
            name
        );
        self.steps.push(Step {
            phase_index,
            name,
            status: StepStatus::Pending,
            start: Utc::now(),
            end: None,
            detail: None,
        });
        idx
    }

    /// Closes the most recent step: success if `exit_code == 0`, else
    /// failed. Console duration is colored; state is persisted in-memory.
    pub fn step_done(&mut self, exit_code: i32, detail: Option<String>) {
        self.step_done_at(self.steps.len().saturating_sub(1), exit_code, detail)
    }

    /// Close a specific step — used when the step and its conclusion are
    /// not adjacent (e.g. warnings discovered after a log scan).
    pub fn step_done_at(&mut self, step_idx: usize, exit_code: i32, detail: Option<String>) {
        let Some(step) = self.steps.get_mut(step_idx) else {
            return;
        };
        step.end = Some(Utc::now());
        step.status = if exit_code == 0 {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };
        step.detail = detail.clone();
        let elapsed = step
            .end
            .unwrap()
            .signed_duration_since(step.start)
            .num_seconds()
            .max(0) as u64;
        let rendered = crate::util::format_duration(std::time::Duration::from_secs(elapsed));
        let line = format!("  done in {rendered}");
        if exit_code == 0 {
            println!("{}", style(line).green());
        } else {
            println!("{}", style(format!("{line} (exit {exit_code})")).red());
        }
        if let Some(d) = detail {
            println!("  {}", style(d).dim());
        }
    }

    /// Downgrade an already-closed step from `Success` to
    /// `SuccessWithWarnings` (§4.4 log-error detection, §7).
    pub fn step_warn(&mut self, step_idx: usize, detail: impl Into<String>) {
        if let Some(step) = self.steps.get_mut(step_idx) {
            if step.status == StepStatus::Success {
                step.status = StepStatus::SuccessWithWarnings;
            }
            step.detail = Some(detail.into());
        }
    }

    /// Attach an item to the most-recent step.
    pub fn item(
        &mut self,
        status: ItemStatus,
        name: impl Into<String>,
        detail: Option<String>,
    ) -> anyhow::Result<()> {
        if self.steps.is_empty() {
            anyhow::bail!("InvalidArgument: no step open to attach an item to");
        }
        let step_index = self.steps.len() - 1;
        self.items.push(Item {
            step_index,
            status,
            name: name.into(),
            detail,
        });
        Ok(())
    }

    pub fn metric(&mut self, key: &str, value: i64, op: MetricOp) {
        match op {
            MetricOp::Set => {
                self.metrics.insert(key.to_string(), value);
            }
            MetricOp::Add => {
                *self.metrics.entry(key.to_string()).or_insert(0) += value;
            }
            MetricOp::Max => {
                let e = self.metrics.entry(key.to_string()).or_insert(value);
                if value > *e {
                    *e = value;
                }
            }
            MetricOp::Min => {
                let e = self.metrics.entry(key.to_string()).or_insert(value);
                if value < *e {
                    *e = value;
                }
            }
        }
    }

    /// Interactive confirmation: verbatim token match, not yes/no (§9).
    pub fn confirm(&mut self, prompt: &str, token: &str) -> bool {
        let step_index = self.steps.len().checked_sub(1);
        if self.auto_yes {
            self.confirmations.push(Confirmation {
                step_index,
                kind: ConfirmKind::Confirm,
                prompt: prompt.to_string(),
                outcome: "auto_yes".into(),
            });
            return true;
        }
        if self.auto_no {
            self.confirmations.push(Confirmation {
                step_index,
                kind: ConfirmKind::Confirm,
                prompt: prompt.to_string(),
                outcome: "auto_no".into(),
            });
            return false;
        }
        let typed: String = Input::new()
            .with_prompt(format!("{prompt} (type '{token}' to proceed)"))
            .allow_empty(true)
            .interact_text()
            .unwrap_or_default();
        let ok = typed == token;
        self.confirmations.push(Confirmation {
            step_index,
            kind: ConfirmKind::Confirm,
            prompt: prompt.to_string(),
            outcome: if ok { typed } else { "denied".into() },
        });
        ok
    }

    /// Like `confirm`, but a mismatch is a fatal error, used for
    /// destructive confirmations (RESTORE, OPEN RESETLOGS, ...).
    pub fn confirm_retype(&mut self, prompt: &str, expected: &str) -> anyhow::Result<()> {
        if self.confirm(prompt, expected) {
            Ok(())
        } else {
            anyhow::bail!("operator declined confirmation: {prompt}")
        }
    }

    /// Numbered menu; `AUTO_YES=1` returns 0, otherwise a 1-based number is
    /// read and converted to a zero-based index.
    pub fn select(&mut self, prompt: &str, options: &[&str]) -> usize {
        let step_index = self.steps.len().checked_sub(1);
        let idx = if self.auto_yes {
            0
        } else {
            Select::new()
                .with_prompt(prompt)
                .items(options)
                .default(0)
                .interact()
                .unwrap_or(0)
        };
        self.confirmations.push(Confirmation {
            step_index,
            kind: ConfirmKind::Select,
            prompt: prompt.to_string(),
            outcome: options.get(idx).copied().unwrap_or("").to_string(),
        });
        idx
    }

    /// Shows the first 200 lines of `preview_file`, requests confirmation
    /// with token `YES`, then invokes `exec_fn` (a thin wrapper the caller
    /// supplies around C2, so the Report kernel itself never depends on
    /// the process executor).
    pub fn preview_exec<F>(&mut self, preview_file: &Path, exec_fn: F) -> anyhow::Result<i32>
    where
        F: FnOnce() -> anyhow::Result<i32>,
    {
        let mut content = String::new();
        std::fs::File::open(preview_file)?.read_to_string(&mut content)?;
        for line in content.lines().take(200) {
            println!("  {line}");
        }
        if !self.confirm(&format!("Execute {}?", preview_file.display()), "YES") {
            return Ok(1);
        }
        exec_fn()
    }

    pub fn totals(&self) -> Totals {
        let mut t = Totals {
            phases: self.phases.len(),
            ..Default::default()
        };
        for step in &self.steps {
            match step.status {
                StepStatus::Success | StepStatus::SuccessWithWarnings => t.steps_success += 1,
                StepStatus::Failed => t.steps_failed += 1,
                StepStatus::Pending => t.steps_pending += 1,
            }
        }
        for item in &self.items {
            match item.status {
                ItemStatus::Ok => t.items_ok += 1,
                ItemStatus::Fail => t.items_fail += 1,
                ItemStatus::Skip => t.items_skip += 1,
                ItemStatus::Warn => t.items_warn += 1,
            }
        }
        t.elapsed_secs = Utc::now().signed_duration_since(self.start_time).num_seconds();
        t.status = if t.steps_failed == 0 && t.items_fail == 0 {
            "SUCCESS".to_string()
        } else {
            "COMPLETED WITH ERRORS".to_string()
        };
        t
    }

    /// Finalize is idempotent within a run but must be called at most once
    /// per Report (§4.1).
    pub fn finalize(&mut self, format: ReportFormat) -> anyhow::Result<PathBuf> {
        let totals = self.totals();
        println!();
        println!("{}", style("Run summary").bold().underlined());
        println!("  status:        {}", totals.status);
        println!("  phases:        {}", totals.phases);
        println!("  steps ok/fail: {}/{}", totals.steps_success, totals.steps_failed);
        println!("  items ok/fail: {}/{}", totals.items_ok, totals.items_fail);
        println!("  elapsed:       {}s", totals.elapsed_secs);

        let ext = match format {
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
        };
        let path = self.output_dir.join(format!("{}_report.{ext}", self.session_id));
        let rendered = match format {
            ReportFormat::Markdown => render::to_markdown(self, &totals, &mask_if_secret),
            ReportFormat::Json => render::to_json(self, &totals, &mask_if_secret)?,
        };
        std::fs::write(&path, rendered)?;
        self.finalized = true;
        Ok(path)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// `aggregate(pattern, op)` — glob-match metric keys and reduce.
    pub fn aggregate(&self, pattern: &str, op: AggregateOp) -> Option<f64> {
        let glob_pat = glob::Pattern::new(pattern).ok()?;
        let values: Vec<i64> = self
            .metrics
            .iter()
            .filter(|(k, _)| glob_pat.matches(k))
            .map(|(_, v)| *v)
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(match op {
            AggregateOp::Sum => values.iter().sum::<i64>() as f64,
            AggregateOp::Avg => values.iter().sum::<i64>() as f64 / values.len() as f64,
            AggregateOp::Max => *values.iter().max().unwrap() as f64,
            AggregateOp::Min => *values.iter().min().unwrap() as f64,
            AggregateOp::Count => values.len() as f64,
        })
    }

    /// Merge all step start/end events into a chronological stream.
    pub fn timeline(&self) -> Vec<(DateTime<Utc>, String)> {
        let mut events = Vec::new();
        for step in &self.steps {
            events.push((step.start, format!("start {}", step.name)));
            if let Some(end) = step.end {
                events.push((end, format!("end {}", step.name)));
            }
        }
        events.sort_by_key(|(t, _)| *t);
        events
    }

    /// The `limit` slowest steps.
    pub fn critical_path(&self, limit: usize) -> Vec<(&Step, i64)> {
        let mut durations: Vec<(&Step, i64)> = self
            .steps
            .iter()
            .filter_map(|s| {
                s.end
                    .map(|e| (s, e.signed_duration_since(s.start).num_seconds()))
            })
            .collect();
        durations.sort_by(|a, b| b.1.cmp(&a.1));
        durations.truncate(limit);
        durations
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AggregateOp {
    Sum,
    Avg,
    Max,
    Min,
    Count,
}

/// Graceful wrappers (§4.1): no-op if `init` was never called. All
/// non-core components must use these, never the strict `Report` methods
/// directly, so a producer can emit tracking calls whether or not a
/// Report has been initialized for the current process.
pub mod track {
    use super::*;

    pub fn meta(report: &mut Option<Report>, key: &str, value: &str) {
        if let Some(r) = report {
            r.meta(key, value);
        }
    }

    pub fn phase(report: &mut Option<Report>, name: &str) {
        if let Some(r) = report {
            r.phase(name);
        }
    }

    pub fn step(report: &mut Option<Report>, name: &str) -> Option<usize> {
        report.as_mut().map(|r| r.step(name))
    }

    pub fn step_done(report: &mut Option<Report>, exit_code: i32, detail: Option<String>) {
        if let Some(r) = report {
            r.step_done(exit_code, detail);
        }
    }

    pub fn item(
        report: &mut Option<Report>,
        status: ItemStatus,
        name: &str,
        detail: Option<String>,
    ) {
        if let Some(r) = report {
            let _ = r.item(status, name, detail);
        }
    }

    pub fn metric(report: &mut Option<Report>, key: &str, value: i64, op: MetricOp) {
        if let Some(r) = report {
            r.metric(key, value, op);
        }
    }

    pub fn confirm(report: &mut Option<Report>, prompt: &str, token: &str) -> bool {
        match report {
            Some(r) => r.confirm(prompt, token),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_report(dir: &Path) -> Report {
        Report::init("Test Restore", dir, Some("20260728_120000".into())).unwrap()
    }

    #[test]
    fn p7_finalize_is_pure_function_of_tree() {
        let dir = tempdir().unwrap();
        let mut r1 = new_report(dir.path());
        r1.phase("Validation");
        r1.step("Validate config");
        r1.step_done(0, None);
        r1.item(ItemStatus::Ok, "ORACLE_HOME", None).unwrap();

        let out1 = dir.path().join("out1");
        std::fs::create_dir_all(&out1).unwrap();
        r1.output_dir = out1.clone();
        let path1 = r1.finalize(ReportFormat::Markdown).unwrap();
        let md1 = std::fs::read_to_string(&path1).unwrap();

        let mut r2 = new_report(dir.path());
        r2.phase("Validation");
        r2.step("Validate config");
        r2.step_done(0, None);
        r2.item(ItemStatus::Ok, "ORACLE_HOME", None).unwrap();
        let out2 = dir.path().join("out2");
        std::fs::create_dir_all(&out2).unwrap();
        r2.output_dir = out2;
        let path2 = r2.finalize(ReportFormat::Markdown).unwrap();
        let md2 = std::fs::read_to_string(&path2).unwrap();

        assert_eq!(md1, md2);
    }

    #[test]
    fn meta_masks_password_like_keys() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        r.meta("DB_PASSWORD", "hunter2");
        r.meta("TARGET_SID", "ORCL");
        let path = r.finalize(ReportFormat::Markdown).unwrap();
        let md = std::fs::read_to_string(path).unwrap();
        assert!(!md.contains("hunter2"));
        assert!(md.contains("********"));
        assert!(md.contains("ORCL"));
    }

    #[test]
    fn status_is_success_with_no_failures() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        r.phase("Phase A");
        r.step("ok step");
        r.step_done(0, None);
        assert_eq!(r.totals().status, "SUCCESS");
    }

    #[test]
    fn status_reflects_failed_step() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        r.phase("Phase A");
        r.step("bad step");
        r.step_done(1, Some("ORA-00600".into()));
        assert_eq!(r.totals().status, "COMPLETED WITH ERRORS");
    }

    #[test]
    fn item_without_open_step_is_invalid_argument() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        let err = r.item(ItemStatus::Ok, "x", None).unwrap_err();
        assert!(err.to_string().contains("InvalidArgument"));
    }

    #[test]
    fn metric_add_initializes_to_zero() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        r.metric("dp_rows_imported", 100, MetricOp::Add);
        r.metric("dp_rows_imported", 50, MetricOp::Add);
        assert_eq!(r.metrics["dp_rows_imported"], 150);
    }

    #[test]
    fn metric_max_min_default_to_first_seen() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        r.metric("dp_avg_throughput_mbps", 10, MetricOp::Max);
        assert_eq!(r.metrics["dp_avg_throughput_mbps"], 10);
        r.metric("dp_avg_throughput_mbps", 5, MetricOp::Max);
        assert_eq!(r.metrics["dp_avg_throughput_mbps"], 10);
        r.metric("dp_avg_throughput_mbps", 20, MetricOp::Max);
        assert_eq!(r.metrics["dp_avg_throughput_mbps"], 20);
    }

    #[test]
    fn aggregate_sums_glob_matched_metrics() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        r.metric("dp_tables_processed", 3, MetricOp::Add);
        r.metric("dp_rows_imported", 1000, MetricOp::Add);
        let total = r.aggregate("dp_*", AggregateOp::Sum).unwrap();
        assert_eq!(total, 1003.0);
    }

    #[test]
    fn critical_path_orders_by_duration_desc() {
        let dir = tempdir().unwrap();
        let mut r = new_report(dir.path());
        r.phase("P");
        r.step("slow");
        std::thread::sleep(std::time::Duration::from_millis(5));
        r.step_done(0, None);
        r.step("fast");
        r.step_done(0, None);
        let cp = r.critical_path(1);
        assert_eq!(cp.len(), 1);
        assert_eq!(cp[0].0.name, "slow");
    }

    #[test]
    fn track_wrappers_no_op_without_report() {
        let mut none_report: Option<Report> = None;
        track::phase(&mut none_report, "Phase A");
        track::metric(&mut none_report, "dp_rows_imported", 10, MetricOp::Add);
        assert!(track::step(&mut none_report, "x").is_none());
        assert!(!track::confirm(&mut none_report, "proceed?", "YES"));
    }
}
