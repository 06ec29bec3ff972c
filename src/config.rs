//! Flat, immutable run configuration (§3.1) and the validators that build it.
//!
//! Mirrors the teacher's `Config::new` + `find_spec_file` resolution
//! pattern, but layers `/etc/restore.conf`, a plugin-local config file, and
//! the live environment (§6.1) instead of reading a single `forge.toml`.

use crate::errors::ConfigError;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestType {
    Fs,
    Asm,
}

impl std::str::FromStr for DestType {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FS" => Ok(DestType::Fs),
            "ASM" => Ok(DestType::Asm),
            other => Err(ConfigError::InvalidEnum {
                key: "DEST_TYPE".into(),
                value: other.into(),
                allowed: vec!["FS", "ASM"],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRun {
    /// 0 — perform the destructive restore.
    Full,
    /// 1 — stop after validate.
    ValidateOnly,
    /// 2 — stop after configuration (Phase A only).
    ConfigOnly,
}

impl DryRun {
    fn from_u8(v: u8) -> Result<Self, ConfigError> {
        match v {
            0 => Ok(DryRun::Full),
            1 => Ok(DryRun::ValidateOnly),
            2 => Ok(DryRun::ConfigOnly),
            other => Err(ConfigError::InvalidEnum {
                key: "DRY_RUN".into(),
                value: other.to_string(),
                allowed: vec!["0", "1", "2"],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeFrom {
    None,
    Catalog,
    Restore,
    Recover,
}

impl std::str::FromStr for ResumeFrom {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(ResumeFrom::None),
            "catalog" => Ok(ResumeFrom::Catalog),
            "restore" => Ok(ResumeFrom::Restore),
            "recover" => Ok(ResumeFrom::Recover),
            other => Err(ConfigError::InvalidEnum {
                key: "RESUME_FROM".into(),
                value: other.into(),
                allowed: vec!["catalog", "restore", "recover"],
            }),
        }
    }
}

/// A memory size expressed as `<uint>[GMK]` or raw bytes (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySize {
    pub bytes: u64,
}

impl MemorySize {
    pub fn gib(n: u64) -> Self {
        Self {
            bytes: n * 1024 * 1024 * 1024,
        }
    }

    pub fn as_gib_floor(&self) -> u64 {
        self.bytes / (1024 * 1024 * 1024)
    }

    pub fn to_sqlplus_literal(&self) -> String {
        // Oracle parameters accept a raw byte count without a suffix.
        self.bytes.to_string()
    }
}

fn memory_size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)([GMK])?$").unwrap())
}

pub fn parse_memory_size(key: &str, value: &str) -> Result<MemorySize, ConfigError> {
    let caps = memory_size_regex()
        .captures(value)
        .ok_or_else(|| ConfigError::InvalidMemorySize {
            key: key.to_string(),
            value: value.to_string(),
        })?;
    let n: u64 = caps[1].parse().map_err(|_| ConfigError::InvalidMemorySize {
        key: key.to_string(),
        value: value.to_string(),
    })?;
    let bytes = match caps.get(2).map(|m| m.as_str()) {
        Some("G") => n * 1024 * 1024 * 1024,
        Some("M") => n * 1024 * 1024,
        Some("K") => n * 1024,
        None => n,
        _ => unreachable!(),
    };
    Ok(MemorySize { bytes })
}

/// `[A-Za-z0-9_]+` token validator (SID, db_unique_name).
pub fn validate_token(key: &str, value: &str) -> Result<(), ConfigError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidToken {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

pub fn validate_abs_path(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::NotAbsolutePath {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

pub fn validate_bool01(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}

pub fn validate_uint(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidUint {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// A disk-group identifier (`+DG`) or an absolute filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    DiskGroup(String),
    Path(PathBuf),
}

impl StorageLocation {
    pub fn is_disk_group(&self) -> bool {
        matches!(self, StorageLocation::DiskGroup(_))
    }

    pub fn as_rman_literal(&self) -> String {
        match self {
            StorageLocation::DiskGroup(dg) => dg.clone(),
            StorageLocation::Path(p) => p.display().to_string(),
        }
    }
}

fn parse_storage_location(key: &str, value: &str) -> Result<StorageLocation, ConfigError> {
    if let Some(stripped) = value.strip_prefix('+') {
        Ok(StorageLocation::DiskGroup(format!("+{stripped}")))
    } else {
        validate_abs_path(key, value)?;
        Ok(StorageLocation::Path(PathBuf::from(value)))
    }
}

/// The full resolved, immutable configuration for a single run (§3.1).
#[derive(Debug, Clone)]
pub struct Config {
    pub oracle_home: PathBuf,
    pub target_sid: String,
    pub target_db_unique_name: String,
    pub backup_root: PathBuf,
    pub dest_type: DestType,
    pub dest_base: PathBuf,
    pub data_dg: StorageLocation,
    pub fra_dg: StorageLocation,
    pub sga_target: Option<MemorySize>,
    pub pga_target: Option<MemorySize>,
    pub dbid: Option<u64>,
    pub dry_run: DryRun,
    pub auto_yes: bool,
    pub allow_cleanup: bool,
    pub resume_from: ResumeFrom,
    pub continue_mode: bool,
    pub until_time: Option<String>,
    pub until_scn: Option<u64>,
    pub sanitize_drop_hidden: bool,
    pub log_level: String,
}

impl Config {
    /// Build a `Config` from a layered key→value map: `/etc/restore.conf`,
    /// then a plugin-local config, then the live environment, in that
    /// order of increasing precedence (§6.1).
    pub fn from_layers(layers: &[HashMap<String, String>]) -> Result<Self, ConfigError> {
        let mut merged = HashMap::new();
        for layer in layers {
            merged.extend(layer.clone());
        }
        Self::from_map(&merged)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
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
        Self::from_map(&env_layer)
    }

    fn from_map(m: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |k: &str| m.get(k).cloned();
        let require = |k: &str| get(k).ok_or_else(|| ConfigError::MissingRequired(k.to_string()));

        let oracle_home_s = require("ORACLE_HOME")?;
        validate_abs_path("ORACLE_HOME", &oracle_home_s)?;

        let target_sid = require("TARGET_SID")?;
        validate_token("TARGET_SID", &target_sid)?;

        let target_db_unique_name = require("TARGET_DB_UNIQUE_NAME")?;
        validate_token("TARGET_DB_UNIQUE_NAME", &target_db_unique_name)?;

        let backup_root_s = require("BACKUP_ROOT")?;
        validate_abs_path("BACKUP_ROOT", &backup_root_s)?;

        let dest_type: DestType = require("DEST_TYPE")?.parse()?;

        let dest_base_s = require("DEST_BASE")?;
        validate_abs_path("DEST_BASE", &dest_base_s)?;

        let data_dg = parse_storage_location("DATA_DG", &require("DATA_DG")?)?;
        let fra_dg = parse_storage_location("FRA_DG", &require("FRA_DG")?)?;

        if dest_type == DestType::Asm && !(data_dg.is_disk_group() && fra_dg.is_disk_group()) {
            return Err(ConfigError::AsmDiskGroupRequired);
        }

        let sga_target = get("SGA_TARGET")
            .map(|v| parse_memory_size("SGA_TARGET", &v))
            .transpose()?;
        let pga_target = get("PGA_TARGET")
            .map(|v| parse_memory_size("PGA_TARGET", &v))
            .transpose()?;

        let dbid = get("DBID")
            .map(|v| validate_uint("DBID", &v))
            .transpose()?;

        let dry_run = DryRun::from_u8(
            get("DRY_RUN")
                .map(|v| validate_uint("DRY_RUN", &v))
                .transpose()?
                .unwrap_or(0) as u8,
        )?;

        let auto_yes = get("AUTO_YES")
            .map(|v| validate_bool01("AUTO_YES", &v))
            .transpose()?
            .unwrap_or(false);

        let allow_cleanup = get("ALLOW_CLEANUP")
            .map(|v| validate_bool01("ALLOW_CLEANUP", &v))
            .transpose()?
            .unwrap_or(false);

        let resume_from: ResumeFrom = get("RESUME_FROM").unwrap_or_default().parse()?;

        let continue_mode = get("CONTINUE_MODE")
            .map(|v| validate_bool01("CONTINUE_MODE", &v))
            .transpose()?
            .unwrap_or(false);

        let until_time = get("UNTIL_TIME").filter(|s| !s.is_empty());
        let until_scn = get("UNTIL_SCN")
            .filter(|s| !s.is_empty())
            .map(|v| validate_uint("UNTIL_SCN", &v))
            .transpose()?;
        if until_time.is_some() && until_scn.is_some() {
            return Err(ConfigError::ConflictingPitr);
        }

        let sanitize_drop_hidden = get("SANITIZE_DROP_HIDDEN")
            .map(|v| validate_bool01("SANITIZE_DROP_HIDDEN", &v))
            .transpose()?
            .unwrap_or(false);

        let log_level = get("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Config {
            oracle_home: PathBuf::from(oracle_home_s),
            target_sid,
            target_db_unique_name,
            backup_root: PathBuf::from(backup_root_s),
            dest_type,
            dest_base: PathBuf::from(dest_base_s),
            data_dg,
            fra_dg,
            sga_target,
            pga_target,
            dbid,
            dry_run,
            auto_yes,
            allow_cleanup,
            resume_from,
            continue_mode,
            until_time,
            until_scn,
            sanitize_drop_hidden,
            log_level,
        })
    }

    /// `ADMIN_DIR = <DEST_BASE>/admin/<UNQ>/adump` (Phase A step 2).
    pub fn admin_dir(&self) -> PathBuf {
        self.dest_base
            .join("admin")
            .join(&self.target_db_unique_name)
            .join("adump")
    }

    /// Filesystem-mode data directory; meaningless (but harmless) in ASM mode.
    pub fn fs_data_dir(&self) -> PathBuf {
        self.dest_base
            .join("oradata")
            .join(&self.target_db_unique_name)
    }

    pub fn fs_fra_dir(&self) -> PathBuf {
        self.dest_base.join("fra").join(&self.target_db_unique_name)
    }

    /// CONTROL_DIR per Phase A step 2.
    pub fn control_dir(&self) -> PathBuf {
        match self.dest_type {
            DestType::Fs => self.fs_data_dir(),
            DestType::Asm => self.fs_data_dir(),
        }
    }

    pub fn log_dir(&self, session_id: &str) -> PathBuf {
        PathBuf::from(format!(
            "/tmp/restore_{}_logs/{session_id}",
            self.target_sid
        ))
    }

    pub fn lock_file(&self) -> PathBuf {
        PathBuf::from(format!("/tmp/restore_{}.lock", self.target_sid))
    }
}

impl Default for ResumeFrom {
    fn default() -> Self {
        ResumeFrom::None
    }
}

/// Read a simple `KEY=VALUE` (one per line, `#` comments) config file into a
/// layer map. Missing files yield an empty layer rather than an error, since
/// both `/etc/restore.conf` and the plugin-local config are optional (§6.1).
pub fn read_config_file(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_map() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("ORACLE_HOME".into(), "/u01/app/oracle/product/19c".into());
        m.insert("TARGET_SID".into(), "ORCL".into());
        m.insert("TARGET_DB_UNIQUE_NAME".into(), "orcl_clone".into());
        m.insert("BACKUP_ROOT".into(), "/backup/orcl".into());
        m.insert("DEST_TYPE".into(), "FS".into());
        m.insert("DEST_BASE".into(), "/u02/oradata".into());
        m.insert("DATA_DG".into(), "/u02/oradata/data".into());
        m.insert("FRA_DG".into(), "/u02/oradata/fra".into());
        m
    }

    #[test]
    fn minimal_valid_config_parses() {
        let cfg = Config::from_map(&base_map()).unwrap();
        assert_eq!(cfg.target_sid, "ORCL");
        assert_eq!(cfg.dest_type, DestType::Fs);
        assert_eq!(cfg.dry_run, DryRun::Full);
    }

    #[test]
    fn asm_requires_disk_groups() {
        let mut m = base_map();
        m.insert("DEST_TYPE".into(), "ASM".into());
        let err = Config::from_map(&m).unwrap_err();
        assert!(matches!(err, ConfigError::AsmDiskGroupRequired));
    }

    #[test]
    fn asm_with_disk_groups_succeeds() {
        let mut m = base_map();
        m.insert("DEST_TYPE".into(), "ASM".into());
        m.insert("DATA_DG".into(), "+DATA".into());
        m.insert("FRA_DG".into(), "+FRA".into());
        let cfg = Config::from_map(&m).unwrap();
        assert!(cfg.data_dg.is_disk_group());
    }

    #[test]
    fn conflicting_pitr_is_rejected() {
        let mut m = base_map();
        m.insert("UNTIL_TIME".into(), "2026-01-16 14:30:00".into());
        m.insert("UNTIL_SCN".into(), "12345".into());
        let err = Config::from_map(&m).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingPitr));
    }

    #[test]
    fn invalid_sid_token_is_rejected() {
        let mut m = base_map();
        m.insert("TARGET_SID".into(), "bad sid!".into());
        let err = Config::from_map(&m).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidToken { .. }));
    }

    #[test]
    fn memory_size_parses_suffixes() {
        assert_eq!(parse_memory_size("SGA_TARGET", "4G").unwrap().bytes, 4 << 30);
        assert_eq!(parse_memory_size("SGA_TARGET", "512M").unwrap().bytes, 512 << 20);
        assert_eq!(parse_memory_size("SGA_TARGET", "2048").unwrap().bytes, 2048);
    }

    #[test]
    fn memory_size_rejects_garbage() {
        assert!(parse_memory_size("SGA_TARGET", "4GB").is_err());
    }

    #[test]
    fn admin_dir_matches_spec_formula() {
        let cfg = Config::from_map(&base_map()).unwrap();
        assert_eq!(
            cfg.admin_dir(),
            PathBuf::from("/u02/oradata/admin/orcl_clone/adump")
        );
    }

    #[test]
    fn missing_required_key_is_reported() {
        let mut m = base_map();
        m.remove("BACKUP_ROOT");
        let err = Config::from_map(&m).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(k) if k == "BACKUP_ROOT"));
    }

    #[test]
    fn read_config_file_skips_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restore.conf");
        std::fs::write(&path, "# comment\n\nORACLE_HOME=/opt/oracle\nTARGET_SID=\"ORCL\"\n").unwrap();
        let layer = read_config_file(&path);
        assert_eq!(layer.get("ORACLE_HOME").unwrap(), "/opt/oracle");
        assert_eq!(layer.get("TARGET_SID").unwrap(), "ORCL");
    }

    #[test]
    fn layered_env_overrides_file_layer() {
        let mut file_layer = HashMap::new();
        file_layer.insert("TARGET_SID".into(), "FILESID".into());
        let mut env_layer = base_map();
        env_layer.insert("TARGET_SID".into(), "ENVSID".into());
        let cfg = Config::from_layers(&[file_layer, env_layer]).unwrap();
        assert_eq!(cfg.target_sid, "ENVSID");
    }
}
