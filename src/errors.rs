//! Typed error hierarchy for the restore orchestrator.
//!
//! Each subsystem gets its own enum; `OrchestratorError` is the top-level
//! sum type the CLI entry point matches on for exit-code selection (§6.1).

use thiserror::Error;

/// Errors from the Process Executor (C2).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn '{cmd}': {source}")]
    SpawnFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{cmd}' timed out after {seconds}s")]
    TimedOut { cmd: String, seconds: u64 },

    #[error("lock {path} is held by pid {pid}")]
    LockHeld { path: std::path::PathBuf, pid: u32 },

    #[error("failed to write log file {path}: {source}")]
    LogWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the SQL Gateway (C3).
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("sqlplus exited {exit_code}: {detail}")]
    NonZeroExit { exit_code: i32, detail: String },

    #[error("sqlplus connection timed out after {seconds}s")]
    ConnectTimeout { seconds: u64 },

    #[error("wallet directory {0} has no cwallet.sso")]
    WalletMissing(std::path::PathBuf),

    #[error("ORACLE_SID must be set for SYSDBA connections")]
    MissingOracleSid,

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the RMAN Engine (C4).
#[derive(Debug, Error)]
pub enum RmanError {
    #[error("Backup not found: {0}")]
    BackupNotFound(std::path::PathBuf),

    #[error("multiple distinct DBIDs found under backup root: {0:?}")]
    AmbiguousDbid(Vec<u64>),

    #[error("{step} requires the instance to be MOUNTED or OPEN, found {found}")]
    PreconditionFailed { step: String, found: String },

    #[error("cmdfile {0} does not exist")]
    MissingCmdfile(std::path::PathBuf),

    #[error("operator declined confirmation for step {0}")]
    ConfirmationDenied(String),

    #[error("malformed discovery map at line {line}: {text}")]
    MalformedDiscoveryMap { line: usize, text: String },

    #[error("UNTIL_TIME and UNTIL_SCN are mutually exclusive")]
    ConflictingPitr,

    #[error("UNTIL_TIME {0} is outside the archived-log window [{1}, {2}]")]
    PitrOutOfWindow(String, String, String),

    #[error("UNTIL_SCN must be a positive integer, got '{0}'")]
    InvalidScn(String),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the Data Pump Worker Pool (C5).
#[derive(Debug, Error)]
pub enum DataPumpError {
    #[error("threshold '{0}' is not numeric")]
    NonNumericThreshold(String),

    #[error("job '{job}' timed out after {minutes}m")]
    JobTimedOut { job: String, minutes: u64 },

    #[error("no SCN available: network query failed and no fallback given")]
    NoScn,

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration and validation errors (Phase A step 1, §7).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    MissingRequired(String),

    #[error("{key}: expected an absolute path, got '{value}'")]
    NotAbsolutePath { key: String, value: String },

    #[error("{key}: expected one of {allowed:?}, got '{value}'")]
    InvalidEnum {
        key: String,
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("{key}: expected 0 or 1, got '{value}'")]
    InvalidBool { key: String, value: String },

    #[error("{key}: expected an unsigned integer, got '{value}'")]
    InvalidUint { key: String, value: String },

    #[error("{key}: '{value}' does not match [A-Za-z0-9_]+")]
    InvalidToken { key: String, value: String },

    #[error("{key}: '{value}' is not a valid memory size (expected <uint>[GMK] or bytes)")]
    InvalidMemorySize { key: String, value: String },

    #[error("UNTIL_TIME and UNTIL_SCN are mutually exclusive")]
    ConflictingPitr,

    #[error("DEST_TYPE=ASM requires DATA_DG and FRA_DG to start with '+'")]
    AsmDiskGroupRequired,

    #[error("SGA_TARGET% + PGA_TARGET% must not exceed 100 when auto-sized")]
    MemoryPercentOverflow,
}

/// Precondition failures surfaced by Phase A guards (§4.6).
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("{sid} is UP. Use ALLOW_CLEANUP=1 to permit stop.")]
    TargetUp { sid: String },

    #[error("{sid} is in an unresponsive (zombie) state: PMON present but the instance did not answer")]
    TargetZombie { sid: String },

    #[error("destination {0} already contains a controlfile; set ALLOW_CLEANUP=1 and confirm to wipe it")]
    DestinationPopulated(std::path::PathBuf),

    #[error("insufficient memory: {available_gib} GiB available, need at least {required_gib} GiB")]
    InsufficientMemory {
        available_gib: u64,
        required_gib: u64,
    },

    #[error("insufficient disk space: {available_gib} GiB available under {path}, need {required_gib} GiB")]
    InsufficientDiskSpace {
        path: std::path::PathBuf,
        available_gib: u64,
        required_gib: u64,
    },
}

/// Top-level error type the CLI entry point matches against for exit codes.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Rman(#[from] RmanError),

    #[error(transparent)]
    DataPump(#[from] DataPumpError),

    #[error("operator declined confirmation: {0}")]
    ConfirmationDenied(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Map to the process exit code described in §6.1.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Exec(ExecError::TimedOut { .. }) => 124,
            OrchestratorError::Sql(SqlError::ConnectTimeout { .. }) => 124,
            OrchestratorError::DataPump(DataPumpError::JobTimedOut { .. }) => 124,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_defaults_to_one() {
        let err = OrchestratorError::ConfirmationDenied("OPEN-RESETLOGS".into());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn exit_code_for_timeout_is_124() {
        let err = OrchestratorError::Exec(ExecError::TimedOut {
            cmd: "rman".into(),
            seconds: 1200,
        });
        assert_eq!(err.exit_code(), 124);
    }

    #[test]
    fn config_error_carries_key_and_value() {
        let err = ConfigError::InvalidToken {
            key: "TARGET_SID".into(),
            value: "bad sid!".into(),
        };
        assert!(err.to_string().contains("TARGET_SID"));
        assert!(err.to_string().contains("bad sid!"));
    }

    #[test]
    fn rman_error_converts_into_orchestrator_error() {
        let inner = RmanError::BackupNotFound(std::path::PathBuf::from("/nonexistent"));
        let outer: OrchestratorError = inner.into();
        assert_eq!(outer.exit_code(), 1);
        assert!(outer.to_string().contains("/nonexistent"));
    }

    #[test]
    fn precondition_up_message_mentions_allow_cleanup() {
        let err = PreconditionError::TargetUp { sid: "ORCL".into() };
        assert!(err.to_string().contains("ALLOW_CLEANUP=1"));
    }
}
