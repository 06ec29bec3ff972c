//! The PFILE Sanitizer (§9 "Design Notes"): rewrites a PFILE dumped from a
//! restored SPFILE into one safe to start the clone instance with.
//!
//! There is no teacher analogue for Oracle initialization-parameter text;
//! this follows the teacher's `config::Config` style of "parse into a flat
//! key→value map, then re-serialize deterministically".

use crate::config::{Config, MemorySize};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn param_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\*\.)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*)$").unwrap())
}

/// Extracts `db_name` from a raw PFILE's `*.db_name=...` line, if present.
pub fn capture_db_name(raw_pfile: &str) -> Option<String> {
    for line in raw_pfile.lines() {
        if let Some(caps) = param_line_regex().captures(line.trim()) {
            if caps[2].eq_ignore_ascii_case("db_name") {
                return Some(caps[3].trim_matches('\'').to_string());
            }
        }
    }
    None
}

fn key_of(line: &str) -> Option<String> {
    param_line_regex()
        .captures(line.trim())
        .map(|c| c[2].to_ascii_lowercase())
}

/// Builds the minimal `STARTUP NOMOUNT` bootstrap PFILE (Phase B step 6).
pub fn bootstrap_pfile(cfg: &Config, sga: MemorySize, pga: MemorySize) -> String {
    format!(
        "db_name='DUMMY'\n\
         db_unique_name='{unq}'\n\
         diagnostic_dest='{dest_base}'\n\
         audit_file_dest='{admin_dir}'\n\
         control_files='{ctl}/control01.ctl','{ctl}/control02.ctl'\n\
         sga_target={sga}\n\
         pga_aggregate_target={pga}\n\
         processes=1500\n\
         cluster_database=FALSE\n\
         local_listener=''\n",
        unq = cfg.target_db_unique_name,
        dest_base = cfg.dest_base.display(),
        admin_dir = cfg.admin_dir().display(),
        ctl = cfg.control_dir().display(),
        sga = sga.to_sqlplus_literal(),
        pga = pga.to_sqlplus_literal(),
    )
}

/// Keys the sanitizer always sets explicitly; any line for these keys in
/// the raw PFILE is dropped before the canonical block is appended.
const MANAGED_KEYS: &[&str] = &[
    "db_name",
    "db_unique_name",
    "control_files",
    "sga_target",
    "pga_aggregate_target",
    "diagnostic_dest",
    "audit_file_dest",
    "processes",
    "cluster_database",
    "local_listener",
];

/// Produces a restore-safe PFILE: drops every managed key from the raw
/// dump (and, if `drop_hidden`, every `_`-prefixed parameter), then appends
/// the canonical identity/memory/path block. `source_db_name` is restored
/// byte-equivalent since Oracle requires the SPFILE's `db_name` to match
/// the restored controlfile's embedded name (§9 "Open questions").
pub fn sanitize(
    raw_pfile: &str,
    source_db_name: &str,
    cfg: &Config,
    sga: MemorySize,
    pga: MemorySize,
    control_files: &[&Path],
    drop_hidden: bool,
) -> String {
    let mut kept = String::new();
    for line in raw_pfile.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(key) = key_of(trimmed) else {
            kept.push_str(line);
            kept.push('\n');
            continue;
        };
        if MANAGED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if drop_hidden && key.starts_with('_') {
            continue;
        }
        kept.push_str(line);
        kept.push('\n');
    }

    let control_files_literal = control_files
        .iter()
        .map(|p| format!("'{}'", p.display()))
        .collect::<Vec<_>>()
        .join(",");

    kept.push_str(&format!(
        "*.db_name='{source_db_name}'\n\
         *.db_unique_name='{unq}'\n\
         *.control_files={control_files_literal}\n\
         *.sga_target={sga}\n\
         *.pga_aggregate_target={pga}\n\
         *.diagnostic_dest='{dest_base}'\n\
         *.audit_file_dest='{admin_dir}'\n\
         *.processes=1500\n\
         *.cluster_database=FALSE\n\
         *.local_listener=''\n",
        unq = cfg.target_db_unique_name,
        sga = sga.to_sqlplus_literal(),
        pga = pga.to_sqlplus_literal(),
        dest_base = cfg.dest_base.display(),
        admin_dir = cfg.admin_dir().display(),
    ));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg() -> Config {
        let mut m = HashMap::new();
        m.insert("ORACLE_HOME".into(), "/u01/app/oracle/product/19c".into());
        m.insert("TARGET_SID".into(), "ORCL".into());
        m.insert("TARGET_DB_UNIQUE_NAME".into(), "orcl_clone".into());
        m.insert("BACKUP_ROOT".into(), "/backup/orcl".into());
        m.insert("DEST_TYPE".into(), "FS".into());
        m.insert("DEST_BASE".into(), "/u02/oradata".into());
        m.insert("DATA_DG".into(), "/u02/oradata/data".into());
        m.insert("FRA_DG".into(), "/u02/oradata/fra".into());
        Config::from_layers(&[m]).unwrap()
    }

    #[test]
    fn capture_db_name_reads_star_prefixed_key() {
        let raw = "*.db_name='PRODDB'\n*.compatible='19.0.0'\n";
        assert_eq!(capture_db_name(raw), Some("PRODDB".to_string()));
    }

    #[test]
    fn sanitize_restores_original_db_name_not_dummy() {
        let raw = "*.db_name='DUMMY'\n*.compatible='19.0.0'\n_fast_start_parallel_rollback=high\n";
        let out = sanitize(
            raw,
            "PRODDB",
            &cfg(),
            MemorySize::gib(4),
            MemorySize::gib(2),
            &[Path::new("/u02/oradata/orcl_clone/control01.ctl")],
            false,
        );
        assert!(out.contains("*.db_name='PRODDB'"));
        assert!(!out.contains("DUMMY"));
        assert!(out.contains("compatible"));
    }

    #[test]
    fn sanitize_drops_hidden_params_when_requested() {
        let raw = "_fast_start_parallel_rollback=high\ncompatible='19.0.0'\n";
        let out = sanitize(
            raw,
            "PRODDB",
            &cfg(),
            MemorySize::gib(4),
            MemorySize::gib(2),
            &[Path::new("/u02/oradata/orcl_clone/control01.ctl")],
            true,
        );
        assert!(!out.contains("_fast_start_parallel_rollback"));
        assert!(out.contains("compatible"));
    }

    #[test]
    fn bootstrap_pfile_sets_dummy_identity() {
        let s = bootstrap_pfile(&cfg(), MemorySize::gib(4), MemorySize::gib(2));
        assert!(s.contains("db_name='DUMMY'"));
        assert!(s.contains("db_unique_name='orcl_clone'"));
    }
}
