//! CLI entry point: layers `/etc/restore.conf`, a plugin-local config file,
//! the live environment, and CLI flags (last wins) into a `Config`, wires up
//! `tracing`, and drives the restore orchestrator to completion (§6.1).

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use oracle_restore::config::{Config, ResumeFrom};
use oracle_restore::orchestrator::OrchestratorContext;

#[derive(Parser)]
#[command(name = "restore")]
#[command(version, about = "Resumable RMAN-based Oracle disaster-recovery orchestrator")]
struct Cli {
    /// Auto-detect current database state and skip completed phases.
    #[arg(short = 'c', long = "continue")]
    continue_mode: bool,

    /// Skip straight to a named phase: catalog, restore, or recover.
    #[arg(long = "resume-from", value_name = "PHASE")]
    resume_from: Option<String>,

    /// Point-in-time recovery target, 'YYYY-MM-DD HH:MM:SS'.
    #[arg(long = "until-time", value_name = "TIMESTAMP")]
    until_time: Option<String>,

    /// Point-in-time recovery target SCN.
    #[arg(long = "until-scn", value_name = "SCN")]
    until_scn: Option<u64>,

    /// Path to a plugin-local config file, layered over /etc/restore.conf.
    #[arg(long = "config", value_name = "PATH")]
    config_file: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut layers: Vec<HashMap<String, String>> = Vec::new();
    layers.push(oracle_restore::config::read_config_file(std::path::Path::new(
        "/etc/restore.conf",
    )));
    if let Some(path) = &cli.config_file {
        layers.push(oracle_restore::config::read_config_file(path));
    }

    let mut env_layer = HashMap::new();
    for key in [
        "ORACLE_HOME",
        "TARGET_SID",
        "TARGET_DB_UNIQUE_NAME",
        "BACKUP_ROOT",
        "DEST_TYPE",
        "DEST_BASE",
        "DATA_DG",
        "FRA_DG",
        "SGA_TARGET",
        "PGA_TARGET",
        "DBID",
        "DRY_RUN",
        "AUTO_YES",
        "ALLOW_CLEANUP",
        "RESUME_FROM",
        "CONTINUE_MODE",
        "UNTIL_TIME",
        "UNTIL_SCN",
        "SANITIZE_DROP_HIDDEN",
        "LOG_LEVEL",
    ] {
        if let Ok(v) = std::env::var(key) {
            env_layer.insert(key.to_string(), v);
        }
    }
    layers.push(env_layer);

    let mut cli_layer = HashMap::new();
    if cli.continue_mode {
        cli_layer.insert("CONTINUE_MODE".to_string(), "1".to_string());
    }
    if let Some(r) = &cli.resume_from {
        cli_layer.insert("RESUME_FROM".to_string(), r.clone());
    }
    if let Some(t) = &cli.until_time {
        cli_layer.insert("UNTIL_TIME".to_string(), t.clone());
    }
    if let Some(scn) = cli.until_scn {
        cli_layer.insert("UNTIL_SCN".to_string(), scn.to_string());
    }
    layers.push(cli_layer);

    Ok(Config::from_layers(&layers)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    tracing::info!(
        sid = %config.target_sid,
        continue_mode = config.continue_mode,
        resume_from = ?config.resume_from,
        "starting restore"
    );

    let ctx = OrchestratorContext::new(config)?;
    let exit_code = oracle_restore::orchestrator::run(ctx).await;
    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_continue_short_flag() {
        let cli = Cli::parse_from(["restore", "-c"]);
        assert!(cli.continue_mode);
    }

    #[test]
    fn cli_parses_resume_from_and_pitr_flags() {
        let cli = Cli::parse_from([
            "restore",
            "--resume-from=catalog",
            "--until-time=2026-01-16 14:30:00",
        ]);
        assert_eq!(cli.resume_from.as_deref(), Some("catalog"));
        assert_eq!(cli.until_time.as_deref(), Some("2026-01-16 14:30:00"));
    }

    #[test]
    fn cli_parses_until_scn() {
        let cli = Cli::parse_from(["restore", "--until-scn=123456"]);
        assert_eq!(cli.until_scn, Some(123456));
    }
}
