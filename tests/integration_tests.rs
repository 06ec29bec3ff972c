//! End-to-end CLI tests for the restore orchestrator binary.
//!
//! These exercise the process boundary (argument parsing, config layering,
//! and the clean-failure paths reachable without a real Oracle Home) rather
//! than anything that would touch `sqlplus`/`rman` directly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::HashMap;
use tempfile::TempDir;

fn restore() -> Command {
    Command::cargo_bin("oracle-restore").unwrap()
}

/// Minimal set of env vars `Config::from_map` requires, rooted under a
/// scratch directory so nothing touches the real filesystem layout.
fn minimal_env(scratch: &TempDir) -> HashMap<&'static str, String> {
    let mut env = HashMap::new();
    env.insert("ORACLE_HOME", "/u01/app/oracle/product/19c".to_string());
    env.insert("TARGET_SID", "ORCL".to_string());
    env.insert("TARGET_DB_UNIQUE_NAME", "orcl_clone".to_string());
    env.insert(
        "BACKUP_ROOT",
        scratch.path().join("backup").to_string_lossy().to_string(),
    );
    env.insert("DEST_TYPE", "FS".to_string());
    env.insert(
        "DEST_BASE",
        scratch.path().join("oradata").to_string_lossy().to_string(),
    );
    env.insert(
        "DATA_DG",
        scratch.path().join("oradata/data").to_string_lossy().to_string(),
    );
    env.insert(
        "FRA_DG",
        scratch.path().join("oradata/fra").to_string_lossy().to_string(),
    );
    env
}

mod cli_basics {
    use super::*;

    #[test]
    fn help_mentions_the_tool() {
        restore()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Resumable RMAN-based Oracle disaster-recovery orchestrator",
            ));
    }

    #[test]
    fn version_flag_succeeds() {
        restore().arg("--version").assert().success();
    }

    #[test]
    fn unknown_flag_is_rejected_by_clap() {
        restore()
            .arg("--not-a-real-flag")
            .assert()
            .failure()
            .stderr(predicate::str::contains("unexpected"));
    }
}

mod config_validation {
    use super::*;

    #[test]
    fn missing_required_key_fails_cleanly() {
        // No env vars at all: ORACLE_HOME is the first required key.
        restore()
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .assert()
            .failure()
            .stderr(predicate::str::contains("ORACLE_HOME"));
    }

    #[test]
    fn invalid_dest_type_is_reported_by_name() {
        let scratch = TempDir::new().unwrap();
        let mut env = minimal_env(&scratch);
        env.insert("DEST_TYPE", "NFS".to_string());

        let mut cmd = restore();
        cmd.env_clear().env("PATH", std::env::var("PATH").unwrap_or_default());
        for (k, v) in &env {
            cmd.env(k, v);
        }
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("DEST_TYPE"));
    }

    #[test]
    fn asm_without_disk_groups_is_rejected() {
        let scratch = TempDir::new().unwrap();
        let mut env = minimal_env(&scratch);
        env.insert("DEST_TYPE", "ASM".to_string());
        // DATA_DG/FRA_DG remain plain filesystem paths, not `+`-prefixed.

        let mut cmd = restore();
        cmd.env_clear().env("PATH", std::env::var("PATH").unwrap_or_default());
        for (k, v) in &env {
            cmd.env(k, v);
        }
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("DATA_DG"));
    }

    #[test]
    fn conflicting_pitr_bounds_are_rejected() {
        let scratch = TempDir::new().unwrap();
        let env = minimal_env(&scratch);

        let mut cmd = restore();
        cmd.env_clear().env("PATH", std::env::var("PATH").unwrap_or_default());
        for (k, v) in &env {
            cmd.env(k, v);
        }
        cmd.arg("--until-time=2026-01-16 14:30:00")
            .arg("--until-scn=123456")
            .assert()
            .failure();
    }
}

mod config_file_layering {
    use super::*;

    #[test]
    fn plugin_config_file_supplies_required_keys() {
        let scratch = TempDir::new().unwrap();
        let backup_root = scratch.path().join("backup");
        let dest_base = scratch.path().join("oradata");
        let config_path = scratch.path().join("restore.conf");
        std::fs::write(
            &config_path,
            format!(
                "ORACLE_HOME=/u01/app/oracle/product/19c\n\
                 TARGET_SID=ORCL\n\
                 TARGET_DB_UNIQUE_NAME=orcl_clone\n\
                 BACKUP_ROOT={}\n\
                 DEST_TYPE=FS\n\
                 DEST_BASE={}\n\
                 DATA_DG={}/data\n\
                 FRA_DG={}/fra\n",
                backup_root.display(),
                dest_base.display(),
                dest_base.display(),
                dest_base.display(),
            ),
        )
        .unwrap();

        // An empty BACKUP_ROOT means discovery fails before anything tries
        // to shell out to sqlplus/rman, which keeps this test hermetic.
        restore()
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .arg("--config")
            .arg(&config_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Backup not found"));
    }
}

mod discovery_failure_paths {
    use super::*;

    #[test]
    fn empty_backup_root_fails_without_touching_oracle() {
        let scratch = TempDir::new().unwrap();
        std::fs::create_dir_all(scratch.path().join("backup")).unwrap();
        let env = minimal_env(&scratch);

        let mut cmd = restore();
        cmd.env_clear().env("PATH", std::env::var("PATH").unwrap_or_default());
        for (k, v) in &env {
            cmd.env(k, v);
        }
        // No `c-<DBID>-...` autobackup piece under BACKUP_ROOT, so discovery
        // must fail cleanly rather than hang waiting on a live instance.
        cmd.timeout(std::time::Duration::from_secs(10))
            .assert()
            .failure();
    }
}
