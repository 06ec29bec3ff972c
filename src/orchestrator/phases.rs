//! Phase A-D step bodies for the restore state machine (§4.6).
//!
//! Each phase function takes the shared `OrchestratorContext` and drives a
//! contiguous run of numbered steps, mirroring the teacher's `dag::executor`
//! "one function per stage, explicit state threaded through" shape rather
//! than a single monolithic `run()`.

use super::OrchestratorContext;
use crate::config::{DryRun, StorageLocation};
use crate::errors::{OrchestratorError, PreconditionError, RmanError};
use crate::report::{ItemStatus, MetricOp};
use crate::rman::scripts::Pitr;
use crate::rman::{RestoreWindow, RmanEngine};
use crate::sql::{Connection, SqlGateway};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Probes the target instance's `v$instance.status` (`OPEN`, `MOUNTED`,
/// `STARTED`) alongside whether a PMON process is live. A failed SQL probe
/// (instance not even at NOMOUNT) reads as `DOWN`.
pub async fn probe_instance_state(sid: &str) -> (String, bool) {
    let pmon = crate::util::pmon_present(sid);
    if crate::sql::skip_oracle_cmds() {
        return ("DOWN".to_string(), pmon);
    }
    match SqlGateway::sysdba_query(sid, "SELECT status FROM v$instance").await {
        Ok(out) => {
            let status = out.trim().to_uppercase();
            if status.is_empty() {
                ("STARTED".to_string(), pmon)
            } else {
                (status, pmon)
            }
        }
        Err(_) => ("DOWN".to_string(), pmon),
    }
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{2}-[A-Z]{3}-\d{2,4} \d{2}:\d{2}:\d{2}|\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}")
            .unwrap()
    })
}

/// Pulls every timestamp-shaped token out of an RMAN `list` log and returns
/// `(earliest, latest)`, used to approximate the backup/archive window
/// without a structured RMAN output format to parse against (§4.4).
fn extract_window(log_text: &str) -> Option<(String, String)> {
    let mut dates: Vec<String> = date_regex()
        .find_iter(log_text)
        .map(|m| m.as_str().to_string())
        .collect();
    if dates.is_empty() {
        return None;
    }
    dates.sort();
    let min = dates.first().cloned()?;
    let max = dates.last().cloned()?;
    Some((min, max))
}

/// Phase A — Validate, resolve paths, discover the backup, guard against a
/// live/zombie target, and size memory (§4.6 steps 1-5). Returns `true` if
/// `DRY_RUN=2` means the run should stop here.
pub async fn phase_a(ctx: &mut OrchestratorContext) -> Result<bool, OrchestratorError> {
    ctx.phase("Phase A: validate and discover");

    ctx.step("Resolve paths");
    ctx.item(ItemStatus::Ok, "ADMIN_DIR", Some(ctx.config.admin_dir().display().to_string()));
    ctx.item(ItemStatus::Ok, "CONTROL_DIR", Some(ctx.config.control_dir().display().to_string()));
    ctx.item(ItemStatus::Ok, "FRA_DIR", Some(ctx.config.fs_fra_dir().display().to_string()));
    ctx.step_done(0, None);

    ctx.step("Discover backup");
    let (backup_dir, discovered_dbid) =
        crate::rman::discover_backup(&ctx.config.backup_root, 10)?;
    let dbid = ctx.config.dbid.unwrap_or(discovered_dbid);
    ctx.dbid = Some(dbid);
    ctx.metric("rman_dbid", dbid as i64, MetricOp::Set);
    ctx.item(ItemStatus::Ok, "backup location", Some(backup_dir.display().to_string()));
    ctx.step_done(0, None);

    ctx.step("Guard: target instance state");
    let sid = ctx.config.target_sid.clone();
    let (status, pmon) = probe_instance_state(&sid).await;
    if status == "OPEN" {
        if !ctx.config.allow_cleanup {
            return Err(PreconditionError::TargetUp { sid: sid.clone() }.into());
        }
        let prompt = format!("{sid} is UP. Shut it down to continue?");
        let token = format!("STOP-{sid}");
        if !ctx.confirm(&prompt, &token) {
            return Err(OrchestratorError::ConfirmationDenied(prompt));
        }
        SqlGateway::sysdba_exec(&sid, "SHUTDOWN ABORT", Some(120), false).await?;
        let (status_after, _) = probe_instance_state(&sid).await;
        if status_after == "OPEN" {
            return Err(PreconditionError::TargetUp { sid }.into());
        }
    } else if status == "DOWN" && pmon {
        return Err(PreconditionError::TargetZombie { sid }.into());
    }
    ctx.step_done(0, None);

    ctx.step("Ensure destination directories exist");
    let mut dirs = vec![
        ctx.config.admin_dir(),
        ctx.config.control_dir(),
        ctx.config.fs_fra_dir(),
    ];
    if let StorageLocation::Path(p) = &ctx.config.data_dg {
        dirs.push(p.clone());
    }
    if let StorageLocation::Path(p) = &ctx.config.fra_dg {
        dirs.push(p.clone());
    }
    for dir in dirs {
        crate::util::ensure_dir_unless_asm(&dir).map_err(|e| OrchestratorError::Other(e.into()))?;
    }
    ctx.step_done(0, None);

    ctx.step("Check for pre-existing controlfiles");
    let ctl_glob = format!("{}/control*.ctl", ctx.config.control_dir().display());
    let existing: Vec<PathBuf> = glob::glob(&ctl_glob)
        .map_err(|e| OrchestratorError::Other(e.into()))?
        .filter_map(|p| p.ok())
        .collect();
    if !existing.is_empty() {
        if !ctx.config.allow_cleanup {
            return Err(PreconditionError::DestinationPopulated(ctx.config.control_dir()).into());
        }
        let prompt = format!(
            "Destination {} already contains controlfiles.",
            ctx.config.control_dir().display()
        );
        let token = format!("WIPE-{sid}");
        if !ctx.confirm(&prompt, &token) {
            return Err(OrchestratorError::ConfirmationDenied(prompt));
        }
        for pattern in ["control*.ctl", "*.dbf", "*.log"] {
            let g = format!("{}/{pattern}", ctx.config.control_dir().display());
            if let Ok(paths) = glob::glob(&g) {
                for p in paths.flatten() {
                    let _ = std::fs::remove_file(&p);
                }
            }
        }
        ctx.item(ItemStatus::Warn, "controlfile wipe", Some(ctx.config.control_dir().display().to_string()));
    }
    ctx.step_done(0, None);

    ctx.step("Compute memory sizing");
    let (raw, _) = ctx
        .executor
        .capture("free", &["-b"])
        .await
        .map_err(OrchestratorError::Exec)?;
    let text = String::from_utf8_lossy(&raw);
    let (_, available) = crate::util::parse_free_output(&text).unwrap_or((0, 0));
    let plan = crate::util::compute_memory_plan(
        available,
        ctx.config.sga_target,
        ctx.config.pga_target,
        45,
        20,
    )
    .map_err(OrchestratorError::Precondition)?;
    ctx.metric("env_sga_bytes", plan.sga.bytes as i64, MetricOp::Set);
    ctx.metric("env_pga_bytes", plan.pga.bytes as i64, MetricOp::Set);
    ctx.memory = Some(plan);
    ctx.step_done(0, None);

    Ok(ctx.config.dry_run == DryRun::ConfigOnly)
}

/// Phase B — Bootstrap the clone instance on a throwaway PFILE, capture and
/// sanitize the real one, recycle onto it, mount, and build the File
/// Transformation Map (§4.6 steps 6-11).
pub async fn phase_b(ctx: &mut OrchestratorContext) -> Result<(), OrchestratorError> {
    ctx.phase("Phase B: bootstrap and discover files");
    let sid = ctx.config.target_sid.clone();
    let memory = ctx.memory.ok_or_else(|| {
        OrchestratorError::Other(anyhow::anyhow!("memory plan missing; Phase A must run first"))
    })?;

    ctx.step("Write bootstrap PFILE");
    let bootstrap_pfile_path = PathBuf::from(format!("/tmp/init_{sid}_bootstrap.ora"));
    let bootstrap_content = crate::orchestrator::pfile::bootstrap_pfile(&ctx.config, memory.sga, memory.pga);
    std::fs::write(&bootstrap_pfile_path, bootstrap_content)
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    ctx.step_done(0, None);

    ctx.step("Startup nomount on bootstrap PFILE");
    let nomount_sql = format!("STARTUP NOMOUNT PFILE='{}'", bootstrap_pfile_path.display());
    let (code, _) = SqlGateway::sysdba_exec(&sid, &nomount_sql, Some(300), false).await?;
    if code != 0 {
        return Err(RmanError::PreconditionFailed {
            step: "STARTUP NOMOUNT".into(),
            found: format!("exit {code}"),
        }
        .into());
    }
    ctx.step_done(code, None);

    ctx.step("Restore SPFILE and controlfile from autobackup");
    let bootstrap_rcv = ctx.script_path("01_bootstrap.rcv");
    let control01 = ctx.config.control_dir().join("control01.ctl");
    let control02 = ctx.config.control_dir().join("control02.ctl");
    let script = crate::rman::scripts::bootstrap(ctx.channels, ctx.dbid.unwrap_or_default(), &control01.display().to_string());
    std::fs::write(&bootstrap_rcv, script).map_err(|e| OrchestratorError::Other(e.into()))?;
    let bootstrap_log = ctx.log_path("01_bootstrap.log");
    let exit = ctx
        .executor
        .exec_logged_to_file(
            &mut ctx.report,
            "RMAN bootstrap",
            &bootstrap_log,
            "rman",
            &[
                "target",
                "/",
                &format!("cmdfile={}", bootstrap_rcv.display()),
                &format!("log={}", bootstrap_log.display()),
            ],
        )
        .await
        .map_err(RmanError::Exec)?;
    ctx.step_done(exit, None);
    if exit != 0 {
        return Err(RmanError::PreconditionFailed {
            step: "bootstrap restore".into(),
            found: format!("exit {exit}"),
        }
        .into());
    }

    ctx.step("Create PFILE from SPFILE and sanitize");
    let raw_pfile_path = PathBuf::from(format!("/tmp/pfile_raw_{sid}.ora"));
    let create_pfile_sql = format!("CREATE PFILE='{}' FROM SPFILE", raw_pfile_path.display());
    let (code, _) = SqlGateway::sysdba_exec(&sid, &create_pfile_sql, Some(60), false).await?;
    let raw_pfile = std::fs::read_to_string(&raw_pfile_path).unwrap_or_default();
    let source_db_name = crate::orchestrator::pfile::capture_db_name(&raw_pfile)
        .unwrap_or_else(|| "UNKNOWN".to_string());
    ctx.source_db_name = Some(source_db_name.clone());
    let clean = crate::orchestrator::pfile::sanitize(
        &raw_pfile,
        &source_db_name,
        &ctx.config,
        memory.sga,
        memory.pga,
        &[control01.as_path(), control02.as_path()],
        ctx.config.sanitize_drop_hidden,
    );
    let clean_pfile_path = PathBuf::from(format!("/tmp/init_{sid}_clean.ora"));
    std::fs::write(&clean_pfile_path, clean).map_err(|e| OrchestratorError::Other(e.into()))?;
    ctx.item(ItemStatus::Ok, "source db_name", Some(source_db_name));
    ctx.step_done(code, None);

    ctx.step("Recycle instance on sanitized PFILE");
    SqlGateway::sysdba_exec(&sid, "SHUTDOWN ABORT", Some(60), false).await?;
    SqlGateway::sysdba_exec(
        &sid,
        &format!("STARTUP NOMOUNT PFILE='{}'", clean_pfile_path.display()),
        Some(300),
        false,
    )
    .await?;
    SqlGateway::sysdba_exec(&sid, "CREATE SPFILE FROM PFILE", Some(60), false).await?;
    SqlGateway::sysdba_exec(&sid, "SHUTDOWN ABORT", Some(60), false).await?;
    let (code, _) = SqlGateway::sysdba_exec(&sid, "STARTUP NOMOUNT", Some(300), false).await?;
    ctx.step_done(code, None);
    if code != 0 {
        return Err(RmanError::PreconditionFailed {
            step: "STARTUP NOMOUNT (recycled)".into(),
            found: format!("exit {code}"),
        }
        .into());
    }

    ctx.step("Duplicate controlfile copy and mount");
    if control01.exists() {
        std::fs::copy(&control01, &control02).map_err(|e| OrchestratorError::Other(e.into()))?;
    }
    let (code, _) = SqlGateway::sysdba_exec(&sid, "ALTER DATABASE MOUNT", Some(300), false).await?;
    ctx.step_done(code, None);
    if code != 0 {
        return Err(RmanError::PreconditionFailed {
            step: "ALTER DATABASE MOUNT".into(),
            found: format!("exit {code}"),
        }
        .into());
    }

    ctx.step("Generate discovery map and build transformation table");
    let discovery_path = ctx.log_path(&format!("discovery_{sid}.txt"));
    generate_discovery_map(&sid, &discovery_path).await?;
    let discovery_text = std::fs::read_to_string(&discovery_path).unwrap_or_default();
    let ftm = crate::rman::map::build(&ctx.config, &discovery_text)?;
    ctx.metric("rman_ftm_entries", ftm.entries.len() as i64, MetricOp::Set);
    ctx.ftm = Some(ftm);
    ctx.step_done(0, None);

    Ok(())
}

/// Queries the mounted controlfile for every datafile, tempfile, and redo
/// log member and writes them in the three-section discovery-map format
/// the File Transformation Map parses (§4.4 "Discovery map format").
async fn generate_discovery_map(sid: &str, out_path: &Path) -> Result<(), OrchestratorError> {
    let datafiles = SqlGateway::sysdba_query(
        sid,
        "SELECT file# || '|' || name FROM v$datafile ORDER BY file#",
    )
    .await?;
    let tempfiles = SqlGateway::sysdba_query(
        sid,
        "SELECT file# || '|' || name FROM v$tempfile ORDER BY file#",
    )
    .await?;
    let redo = SqlGateway::sysdba_query(
        sid,
        "SELECT l.group# || '|' || lf.member || '|' || l.thread# FROM v$log l \
         JOIN v$logfile lf ON lf.group# = l.group# ORDER BY l.group#",
    )
    .await?;

    let mut out = String::new();
    out.push_str("--DATAFILES--\n");
    if !datafiles.trim().is_empty() {
        out.push_str(datafiles.trim());
        out.push('\n');
    }
    out.push_str("--TEMPFILES--\n");
    if !tempfiles.trim().is_empty() {
        out.push_str(tempfiles.trim());
        out.push('\n');
    }
    out.push_str("--REDO--\n");
    if !redo.trim().is_empty() {
        out.push_str(redo.trim());
        out.push('\n');
    }
    std::fs::write(out_path, out).map_err(|e| OrchestratorError::Other(e.into()))?;
    Ok(())
}

/// Phase C — Crosscheck and catalog the backup, classify its content,
/// analyze the restorable window, and generate the preview/validate/
/// restore/recover scripts (§4.6 steps 12-15).
pub async fn phase_c(ctx: &mut OrchestratorContext) -> Result<(), OrchestratorError> {
    ctx.phase("Phase C: catalog and preview");
    let channels = ctx.channels;
    let backup_root = ctx.config.backup_root.display().to_string();

    let crosscheck_rcv = ctx.script_path("02a_crosscheck.rcv");
    std::fs::write(&crosscheck_rcv, crate::rman::scripts::crosscheck(channels))
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    let crosscheck_log = ctx.log_path("02a_crosscheck.log");
    {
        let engine = RmanEngine::new(&ctx.executor, &ctx.state);
        engine
            .exec_with_state(&mut ctx.report, "CROSSCHECK", &crosscheck_rcv, &crosscheck_log, "RMAN crosscheck")
            .await?;
    }

    let catalog_rcv = ctx.script_path("02b_catalog.rcv");
    std::fs::write(&catalog_rcv, crate::rman::scripts::catalog(channels, &backup_root))
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    let catalog_log = ctx.log_path("02b_catalog.log");
    {
        let engine = RmanEngine::new(&ctx.executor, &ctx.state);
        engine
            .exec_with_state(&mut ctx.report, "CATALOG", &catalog_rcv, &catalog_log, "RMAN catalog")
            .await?;
    }

    ctx.step("Classify catalog content and analyze restore window");
    let catalog_text = std::fs::read_to_string(&catalog_log).unwrap_or_default();
    let backup_sets = catalog_text.matches("BS Key").count() as u64;
    let image_copies = catalog_text.matches("Copy Key").count() as u64;
    let archivelog_count = catalog_text.matches("Archive Log").count() as u64;
    let (content, warn) = crate::rman::classify_catalog_content(backup_sets, image_copies);
    if warn {
        ctx.item(ItemStatus::Warn, "catalog content", Some("no backup sets or image copies found".to_string()));
    } else {
        ctx.item(ItemStatus::Ok, "catalog content", Some(format!("{content:?}")));
    }
    ctx.state
        .set("CATALOG_ARCHIVELOG_COUNT", &archivelog_count.to_string())
        .map_err(OrchestratorError::Other)?;

    let window = extract_window(&catalog_text);
    ctx.restore_window = Some(RestoreWindow {
        backup_window: window.clone(),
        archive_window: window.clone(),
    });
    if let Some((min, max)) = &window {
        ctx.state.set("PITR_WINDOW_MIN", min).map_err(OrchestratorError::Other)?;
        ctx.state.set("PITR_WINDOW_MAX", max).map_err(OrchestratorError::Other)?;
    }
    ctx.step_done(0, None);

    ctx.step("Generate preview/validate/restore/recover scripts");
    let ftm = ctx.ftm.clone().ok_or_else(|| {
        OrchestratorError::Other(anyhow::anyhow!("file transformation map missing; Phase B must run first"))
    })?;
    let pitr = if let Some(t) = ctx.config.until_time.as_deref() {
        Pitr::UntilTime(t)
    } else if let Some(scn) = ctx.config.until_scn {
        Pitr::UntilScn(scn)
    } else {
        Pitr::None
    };

    std::fs::write(ctx.script_path("03_preview.rcv"), crate::rman::scripts::preview(channels, &ftm))
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    std::fs::write(ctx.script_path("04_validate.rcv"), crate::rman::scripts::validate(channels, &ftm))
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    std::fs::write(ctx.script_path("05_restore.rcv"), crate::rman::scripts::restore(channels, &ftm, pitr))
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    std::fs::write(ctx.script_path("06_recover.rcv"), crate::rman::scripts::recover(channels, pitr))
        .map_err(|e| OrchestratorError::Other(e.into()))?;

    let post_restore = crate::rman::scripts::post_restore_sql(&ftm);
    let renames_only: String = post_restore
        .lines()
        .filter(|l| !l.contains("open resetlogs"))
        .map(|l| format!("{l}\n"))
        .collect();
    std::fs::write(ctx.script_path("07_post_restore.sql"), &post_restore)
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    std::fs::write(ctx.script_path("08_rename_files.sql"), &renames_only)
        .map_err(|e| OrchestratorError::Other(e.into()))?;
    ctx.step_done(0, None);

    if let Some(r) = ctx.report.as_mut() {
        r.section("Restore plan preview");
    }
    let preview_text = std::fs::read_to_string(ctx.script_path("03_preview.rcv")).unwrap_or_default();
    for line in preview_text.lines().take(200) {
        println!("  {line}");
    }

    Ok(())
}

/// Phase D — Final guards, the destructive restore/recover, file renames,
/// `OPEN RESETLOGS`, and post-open verification (§4.6 steps 16-20).
pub async fn phase_d(ctx: &mut OrchestratorContext) -> Result<i32, OrchestratorError> {
    ctx.phase("Phase D: restore and open");
    let sid = ctx.config.target_sid.clone();

    ctx.step("Validate PITR bounds");
    if ctx.config.until_time.is_some() || ctx.config.until_scn.is_some() {
        let archive_window = ctx.restore_window.as_ref().and_then(|w| w.archive_window.clone());
        crate::rman::validate_pitr(ctx.config.until_time.as_deref(), ctx.config.until_scn, archive_window.as_ref())?;
    }
    ctx.step_done(0, None);

    ctx.step("Catalog divergence probe");
    let last_crosscheck = ctx.state.get("CROSSCHECK_TIMESTAMP").parse::<i64>().ok();
    let recorded_count = ctx.state.get("CATALOG_ARCHIVELOG_COUNT").parse::<u64>().ok();
    let current_count: u64 = SqlGateway::sysdba_query(&sid, "SELECT COUNT(*) FROM v$archived_log")
        .await
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or_else(|| recorded_count.unwrap_or(0));
    let now = chrono::Utc::now().timestamp();
    if crate::rman::catalog_is_stale(last_crosscheck, now, recorded_count, current_count) {
        ctx.item(ItemStatus::Warn, "catalog", Some("catalog appears stale relative to the archived-log count".to_string()));
        if ctx.confirm("Catalog appears stale. Re-run crosscheck before continuing?", "YES") {
            let crosscheck_rcv = ctx.script_path("02a_crosscheck.rcv");
            let crosscheck_log = ctx.log_path("02a_crosscheck.log");
            let engine = RmanEngine::new(&ctx.executor, &ctx.state).forced();
            engine
                .exec_with_state(&mut ctx.report, "CROSSCHECK", &crosscheck_rcv, &crosscheck_log, "RMAN re-crosscheck")
                .await?;
        }
    }
    ctx.step_done(0, None);

    if ctx.config.dry_run == DryRun::ValidateOnly {
        let preview_path = ctx.script_path("03_preview.rcv");
        let preview_log = ctx.log_path("03_preview.log");
        let validate_path = ctx.script_path("04_validate.rcv");
        let validate_log = ctx.log_path("04_validate.log");
        let engine = RmanEngine::new(&ctx.executor, &ctx.state);
        engine
            .exec_with_state(&mut ctx.report, "PREVIEW", &preview_path, &preview_log, "RMAN preview")
            .await?;
        engine
            .exec_with_state(&mut ctx.report, "VALIDATE", &validate_path, &validate_log, "RMAN validate")
            .await?;
        return Ok(0);
    }

    ctx.step("Check available disk space");
    let db_size_gb: f64 = SqlGateway::sysdba_query(&sid, "SELECT CEIL(SUM(bytes)/1024/1024/1024) FROM v$datafile")
        .await
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0.0);
    let required_gb = db_size_gb * 1.2 + 20.0;
    let available_bytes = fs2::available_space(&ctx.config.dest_base).unwrap_or(0);
    let available_gb = (available_bytes / (1024 * 1024 * 1024)) as f64;
    if available_gb < required_gb {
        return Err(PreconditionError::InsufficientDiskSpace {
            path: ctx.config.dest_base.clone(),
            available_gib: available_gb as u64,
            required_gib: required_gb as u64,
        }
        .into());
    }
    ctx.step_done(0, None);

    let restore_path = ctx.script_path("05_restore.rcv");
    let restore_log = ctx.log_path("05_restore.log");
    {
        let engine = RmanEngine::new(&ctx.executor, &ctx.state).forced();
        engine
            .exec_with_state(&mut ctx.report, "RESTORE", &restore_path, &restore_log, "RMAN restore")
            .await?;
    }

    let recover_path = ctx.script_path("06_recover.rcv");
    let recover_log = ctx.log_path("06_recover.log");
    {
        let engine = RmanEngine::new(&ctx.executor, &ctx.state).forced();
        engine
            .exec_with_state(&mut ctx.report, "RECOVER", &recover_path, &recover_log, "RMAN recover")
            .await?;
    }

    ctx.step("Apply redo and tempfile renames");
    if !ctx.confirm("Apply file renames for redo logs and tempfiles?", "RENAME-FILES") {
        return Err(OrchestratorError::ConfirmationDenied("RENAME-FILES".to_string()));
    }
    let rename_sql = ctx.script_path("08_rename_files.sql");
    let conn = Connection::Sysdba { sid: sid.clone() };
    let rename_log = ctx.log_path("08_rename_files.log");
    let code = SqlGateway::execute_file(&mut ctx.report, &conn, &rename_sql, Some(&rename_log), 300, true).await?;
    if code != 0 {
        ctx.item(ItemStatus::Warn, "rename files", Some("one or more renames failed; file may not exist under its discovered source path".to_string()));
    } else {
        ctx.item(ItemStatus::Ok, "rename files", None);
    }
    ctx.step_done(0, None);

    ctx.step("Open database RESETLOGS");
    if !ctx.confirm("Open the database with RESETLOGS? This is irreversible.", "OPEN-RESETLOGS") {
        return Err(OrchestratorError::ConfirmationDenied("OPEN-RESETLOGS".to_string()));
    }
    let (code, _) = SqlGateway::sysdba_exec(&sid, "ALTER DATABASE OPEN RESETLOGS", Some(1800), false).await?;
    ctx.step_done(code, None);
    if code != 0 {
        return Err(RmanError::PreconditionFailed {
            step: "OPEN RESETLOGS".into(),
            found: format!("exit {code}"),
        }
        .into());
    }

    ctx.step("Optional switch to NOARCHIVELOG");
    if ctx.confirm("Switch database to NOARCHIVELOG mode?", "NOARCHIVELOG") {
        SqlGateway::sysdba_exec(&sid, "SHUTDOWN IMMEDIATE", Some(300), false).await?;
        SqlGateway::sysdba_exec(&sid, "STARTUP MOUNT", Some(300), false).await?;
        SqlGateway::sysdba_exec(&sid, "ALTER DATABASE NOARCHIVELOG", Some(300), false).await?;
        SqlGateway::sysdba_exec(&sid, "ALTER DATABASE OPEN", Some(300), false).await?;
        ctx.item(ItemStatus::Ok, "archivelog mode", Some("NOARCHIVELOG".to_string()));
    } else {
        ctx.item(ItemStatus::Skip, "archivelog mode", Some("left as ARCHIVELOG".to_string()));
    }
    ctx.step_done(0, None);

    ctx.step("Final verification");
    let instance_status = SqlGateway::sysdba_query(&sid, "SELECT status FROM v$instance").await?;
    let datafile_count = SqlGateway::sysdba_query(&sid, "SELECT COUNT(*) FROM v$datafile").await?;
    let tempfile_count = SqlGateway::sysdba_query(&sid, "SELECT COUNT(*) FROM v$tempfile").await?;
    ctx.item(ItemStatus::Ok, "instance status", Some(instance_status.trim().to_string()));
    ctx.item(ItemStatus::Ok, "datafile count", Some(datafile_count.trim().to_string()));
    ctx.item(ItemStatus::Ok, "tempfile count", Some(tempfile_count.trim().to_string()));
    ctx.step_done(0, None);

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_instance_state_reports_down_under_skip_mode() {
        crate::sql::set_skip_oracle_cmds(true);
        let (status, pmon) = probe_instance_state("NOPE_NOT_RUNNING").await;
        crate::sql::set_skip_oracle_cmds(false);
        assert_eq!(status, "DOWN");
        assert!(!pmon);
    }

    #[test]
    fn extract_window_finds_earliest_and_latest_timestamp() {
        let log = "list archivelog all;\n\
                   Archive Log 2026-01-10 08:00:00 thread 1\n\
                   Archive Log 2026-01-05 08:00:00 thread 1\n\
                   Archive Log 2026-01-20 08:00:00 thread 1\n";
        let (min, max) = extract_window(log).unwrap();
        assert_eq!(min, "2026-01-05 08:00:00");
        assert_eq!(max, "2026-01-20 08:00:00");
    }

    #[test]
    fn extract_window_is_none_without_dates() {
        assert!(extract_window("no timestamps here").is_none());
    }
}
