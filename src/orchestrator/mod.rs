//! C6 — Restore Orchestrator: the four-phase state machine that drives the
//! other five components (§4.6).
//!
//! Grounded on the teacher's `main.rs::run_orchestrator` + `gates::mod`
//! (`ApprovalGate`) for "bundle every collaborator into one context object
//! threaded through phase functions instead of process-wide globals" (§9
//! "Globals → explicit context").

pub mod pfile;
pub mod phases;

use crate::config::{Config, ResumeFrom};
use crate::errors::OrchestratorError;
use crate::exec::Executor;
use crate::report::{ItemStatus, MetricOp, Report, ReportFormat};
use crate::rman::{FileTransformationMap, RestoreWindow, RmanEngine};
use crate::sql::Connection;
use crate::state::StateManager;
use crate::util::MemoryPlan;
use std::path::PathBuf;

/// Everything a phase function needs, bundled explicitly instead of read
/// from process-wide state (§9, §4.6.1).
pub struct OrchestratorContext {
    pub config: Config,
    pub report: Option<Report>,
    pub executor: Executor,
    pub state: StateManager,
    pub session_id: String,
    pub log_dir: PathBuf,
    /// Cached cluster-detection result; `None` until probed once (§4.4
    /// "module-global" cache, promoted to a context field per §9).
    pub is_rac: Option<bool>,
    /// DBID accepted from config or discovered in Phase A step 3.
    pub dbid: Option<u64>,
    /// RMAN channel count, computed once in Phase A.
    pub channels: u32,
    /// Memory sizing plan computed in Phase A step 5.
    pub memory: Option<MemoryPlan>,
    /// Original `db_name` captured from the restored SPFILE in Phase B step 8.
    pub source_db_name: Option<String>,
    /// File Transformation Map built in Phase B step 11.
    pub ftm: Option<FileTransformationMap>,
    /// Backup/archive window analyzed in Phase C step 14.
    pub restore_window: Option<RestoreWindow>,
}

impl OrchestratorContext {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let session_id = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_dir = config.log_dir(&session_id);
        std::fs::create_dir_all(&log_dir)?;

        let report = Report::init(
            &format!("Restore: {}", config.target_sid),
            &log_dir,
            Some(session_id.clone()),
        )?;

        let executor = Executor::new()
            .with_env("ORACLE_HOME", config.oracle_home.display().to_string())
            .with_env("ORACLE_SID", config.target_sid.clone())
            .with_env(
                "PATH",
                format!(
                    "{}/bin:{}",
                    config.oracle_home.display(),
                    std::env::var("PATH").unwrap_or_default()
                ),
            )
            .with_env(
                "LD_LIBRARY_PATH",
                format!("{}/lib", config.oracle_home.display()),
            );

        let state = StateManager::new(log_dir.join("execution_state.sh"));
        let channels = crate::rman::scripts::channel_count(None);

        Ok(Self {
            config,
            report: Some(report),
            executor,
            state,
            session_id,
            log_dir,
            is_rac: None,
            dbid: None,
            channels,
            memory: None,
            source_db_name: None,
            ftm: None,
            restore_window: None,
        })
    }

    pub fn rman(&self) -> RmanEngine<'_> {
        RmanEngine::new(&self.executor, &self.state)
    }

    pub fn sysdba(&self) -> Connection {
        Connection::Sysdba {
            sid: self.config.target_sid.clone(),
        }
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(name)
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(name)
    }

    fn report_format(&self) -> ReportFormat {
        ReportFormat::Markdown
    }

    pub fn finalize(&mut self) -> anyhow::Result<PathBuf> {
        if let Some(report) = self.report.as_mut() {
            report.finalize(self.report_format())
        } else {
            anyhow::bail!("no report to finalize")
        }
    }

    /// The orchestrator is the sole owner of the Report's lifecycle, so
    /// phase functions go through these thin wrappers around the strict
    /// core API instead of the `track_*` no-op layer meant for other
    /// components (§4.1).
    pub fn phase(&mut self, name: &str) {
        if let Some(r) = self.report.as_mut() {
            r.phase(name);
        }
    }

    pub fn step(&mut self, name: &str) -> usize {
        self.report.as_mut().map(|r| r.step(name)).unwrap_or(0)
    }

    pub fn step_done(&mut self, exit_code: i32, detail: Option<String>) {
        if let Some(r) = self.report.as_mut() {
            r.step_done(exit_code, detail);
        }
    }

    pub fn item(&mut self, status: ItemStatus, name: &str, detail: Option<String>) {
        crate::report::track::item(&mut self.report, status, name, detail);
    }

    pub fn metric(&mut self, key: &str, value: i64, op: MetricOp) {
        crate::report::track::metric(&mut self.report, key, value, op);
    }

    pub fn confirm(&mut self, prompt: &str, token: &str) -> bool {
        self.report.as_mut().map(|r| r.confirm(prompt, token)).unwrap_or(true)
    }

    pub fn confirm_retype(&mut self, prompt: &str, token: &str) -> Result<(), OrchestratorError> {
        if self.confirm(prompt, token) {
            Ok(())
        } else {
            Err(OrchestratorError::ConfirmationDenied(prompt.to_string()))
        }
    }
}

/// Where `CONTINUE_MODE=1` lands based on a live probe of the target
/// instance (§4.6 "Entry points").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    PhaseA,
    PhaseB,
    PhaseC,
    AlreadyOpen,
}

/// Resolves the entry point from `RESUME_FROM` / `CONTINUE_MODE` (§4.6).
/// `probe` is `(instance_status, pmon_present)`; `instance_status` is one
/// of `OPEN`, `MOUNTED`, `STARTED`, or `DOWN` (SQL probe failed).
pub fn resolve_entry_point(
    resume_from: ResumeFrom,
    continue_mode: bool,
    probe: Option<(&str, bool)>,
) -> EntryPoint {
    match resume_from {
        ResumeFrom::Catalog => return EntryPoint::PhaseC,
        ResumeFrom::Restore | ResumeFrom::Recover => return EntryPoint::PhaseC,
        ResumeFrom::None => {}
    }
    if !continue_mode {
        return EntryPoint::PhaseA;
    }
    match probe {
        Some(("OPEN", _)) => EntryPoint::AlreadyOpen,
        Some(("MOUNTED", _)) => EntryPoint::PhaseC,
        Some(("STARTED", _)) => EntryPoint::PhaseB,
        Some((_, true)) => EntryPoint::PhaseB,
        _ => EntryPoint::PhaseA,
    }
}

/// Runs the full state machine to completion, returning the process exit
/// code (§6.1).
pub async fn run(mut ctx: OrchestratorContext) -> i32 {
    match run_inner(&mut ctx).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", console::style(format!("error: {err}")).red());
            crate::report::track::item(
                &mut ctx.report,
                crate::report::ItemStatus::Fail,
                "orchestrator",
                Some(err.to_string()),
            );
            let _ = ctx.finalize();
            err.exit_code()
        }
    }
}

async fn run_inner(ctx: &mut OrchestratorContext) -> Result<i32, OrchestratorError> {
    let _lock = crate::exec::lock(&ctx.config.lock_file())?;

    let probe = phases::probe_instance_state(&ctx.config.target_sid).await;
    let entry = resolve_entry_point(
        ctx.config.resume_from,
        ctx.config.continue_mode,
        Some((probe.0.as_str(), probe.1)),
    );

    if entry == EntryPoint::AlreadyOpen {
        ctx.finalize().map_err(OrchestratorError::Other)?;
        return Ok(0);
    }

    if entry == EntryPoint::PhaseA {
        let stop_here = phases::phase_a(ctx).await?;
        if stop_here {
            ctx.finalize().map_err(OrchestratorError::Other)?;
            return Ok(0);
        }
        phases::phase_b(ctx).await?;
    } else if entry == EntryPoint::PhaseB {
        phases::phase_b(ctx).await?;
    }

    phases::phase_c(ctx).await?;
    let exit = phases::phase_d(ctx).await?;

    ctx.finalize().map_err(OrchestratorError::Other)?;
    Ok(exit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_from_catalog_lands_in_phase_c() {
        assert_eq!(
            resolve_entry_point(ResumeFrom::Catalog, false, None),
            EntryPoint::PhaseC
        );
    }

    #[test]
    fn continue_mode_open_short_circuits() {
        assert_eq!(
            resolve_entry_point(ResumeFrom::None, true, Some(("OPEN", true))),
            EntryPoint::AlreadyOpen
        );
    }

    #[test]
    fn continue_mode_mounted_lands_in_phase_c() {
        assert_eq!(
            resolve_entry_point(ResumeFrom::None, true, Some(("MOUNTED", true))),
            EntryPoint::PhaseC
        );
    }

    #[test]
    fn continue_mode_nomount_lands_in_phase_b() {
        assert_eq!(
            resolve_entry_point(ResumeFrom::None, true, Some(("STARTED", true))),
            EntryPoint::PhaseB
        );
    }

    #[test]
    fn continue_mode_zombie_like_pmon_without_answer_lands_in_phase_b() {
        assert_eq!(
            resolve_entry_point(ResumeFrom::None, true, Some(("DOWN", true))),
            EntryPoint::PhaseB
        );
    }

    #[test]
    fn continue_mode_down_with_no_pmon_starts_cold() {
        assert_eq!(
            resolve_entry_point(ResumeFrom::None, true, Some(("DOWN", false))),
            EntryPoint::PhaseA
        );
    }

    #[test]
    fn cold_start_ignores_probe() {
        assert_eq!(resolve_entry_point(ResumeFrom::None, false, None), EntryPoint::PhaseA);
    }
}
