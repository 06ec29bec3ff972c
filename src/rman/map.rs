//! The File Transformation Map (§3.2): source → destination remapping for
//! every datafile, tempfile, and redo log member discovered in the mounted
//! controlfile.
//!
//! Grounded on the teacher's `dag::executor` ordered-node-list pattern for
//! "a finite ordered sequence the rest of the system walks in emission
//! order", generalized from a dependency graph to a flat remapping table.

use crate::config::{Config, DestType};
use crate::errors::RmanError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Datafile,
    Tempfile,
    RedoLog,
}

impl FileKind {
    fn target_ext(self) -> &'static str {
        match self {
            FileKind::Datafile => "dbf",
            FileKind::Tempfile => "dbf",
            FileKind::RedoLog => "log",
        }
    }
}

/// One row of the transformation map (§3.2).
#[derive(Debug, Clone)]
pub struct FtmEntry {
    pub kind: FileKind,
    pub id: u32,
    /// Redo thread number; only meaningful for `FileKind::RedoLog`.
    pub thread: Option<u32>,
    pub source_path: String,
    pub dest_path: String,
}

/// The ordered sequence of entries, iterated in discovery order when
/// emitting `set newname` / rename statements (§3.2, §4.4).
#[derive(Debug, Clone, Default)]
pub struct FileTransformationMap {
    pub entries: Vec<FtmEntry>,
}

impl FileTransformationMap {
    pub fn datafiles(&self) -> impl Iterator<Item = &FtmEntry> {
        self.entries.iter().filter(|e| e.kind == FileKind::Datafile)
    }

    pub fn tempfiles(&self) -> impl Iterator<Item = &FtmEntry> {
        self.entries.iter().filter(|e| e.kind == FileKind::Tempfile)
    }

    pub fn redo_logs(&self) -> impl Iterator<Item = &FtmEntry> {
        self.entries.iter().filter(|e| e.kind == FileKind::RedoLog)
    }

    /// Every non-redo entry, in emission order, for the `set newname`
    /// blocks shared by the preview/validate/restore scripts (§4.4).
    pub fn non_redo(&self) -> impl Iterator<Item = &FtmEntry> {
        self.entries.iter().filter(|e| e.kind != FileKind::RedoLog)
    }
}

fn omf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^o1_mf_(.+)_[a-z0-9]+_\.dbf$").unwrap())
}

fn asm_versioned_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_]*)\.\d+\.\d+$").unwrap())
}

fn non_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_]").unwrap())
}

/// Derives a clean, filesystem-safe stem from `source_path` and appends
/// `target_ext` (§4.4 "Name cleaning").
pub fn clean_name(source_path: &str, kind: FileKind) -> String {
    let filename = source_path.rsplit('/').next().unwrap_or(source_path);
    let stem = if let Some(caps) = omf_regex().captures(filename) {
        caps[1].to_string()
    } else if let Some(caps) = asm_versioned_regex().captures(filename) {
        caps[1].to_string()
    } else {
        match filename.rsplit_once('.') {
            Some((base, _ext)) => base.to_string(),
            None => filename.to_string(),
        }
    };
    let sanitized = non_token_regex().replace_all(&stem, "").to_string();
    format!("{}.{}", sanitized.to_lowercase(), kind.target_ext())
}

/// A single row of the discovery map as produced by querying the mounted
/// controlfile (§4.4 "Discovery map format").
#[derive(Debug, Clone)]
enum RawRow {
    Datafile { file_no: u32, path: String },
    Tempfile { file_no: u32, path: String },
    Redo { group_no: u32, member: String, thread: u32 },
}

fn section_sentinel() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^--[A-Z_]+--$").unwrap())
}

fn parse_discovery_map(text: &str) -> Result<Vec<RawRow>, RmanError> {
    let mut rows = Vec::new();
    let mut section = "";
    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if section_sentinel().is_match(line) {
            section = line;
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        match section {
            "--DATAFILES--" => {
                let [file_no, path] = fields[..] else {
                    return Err(RmanError::MalformedDiscoveryMap { line: line_no + 1, text: raw_line.to_string() });
                };
                let file_no: u32 = file_no.parse().map_err(|_| RmanError::MalformedDiscoveryMap {
                    line: line_no + 1,
                    text: raw_line.to_string(),
                })?;
                rows.push(RawRow::Datafile { file_no, path: path.to_string() });
            }
            "--TEMPFILES--" => {
                let [file_no, path] = fields[..] else {
                    return Err(RmanError::MalformedDiscoveryMap { line: line_no + 1, text: raw_line.to_string() });
                };
                let file_no: u32 = file_no.parse().map_err(|_| RmanError::MalformedDiscoveryMap {
                    line: line_no + 1,
                    text: raw_line.to_string(),
                })?;
                rows.push(RawRow::Tempfile { file_no, path: path.to_string() });
            }
            "--REDO--" => {
                let [group_no, member, thread] = fields[..] else {
                    return Err(RmanError::MalformedDiscoveryMap { line: line_no + 1, text: raw_line.to_string() });
                };
                let group_no: u32 = group_no.parse().map_err(|_| RmanError::MalformedDiscoveryMap {
                    line: line_no + 1,
                    text: raw_line.to_string(),
                })?;
                let thread: u32 = thread.parse().map_err(|_| RmanError::MalformedDiscoveryMap {
                    line: line_no + 1,
                    text: raw_line.to_string(),
                })?;
                rows.push(RawRow::Redo { group_no, member: member.to_string(), thread });
            }
            _ => {
                return Err(RmanError::MalformedDiscoveryMap { line: line_no + 1, text: raw_line.to_string() });
            }
        }
    }
    Ok(rows)
}

/// Computes the destination path for one entry per the §4.4 table, given
/// an already-disambiguated cleaned name.
fn compute_dest(cfg: &Config, kind: FileKind, cleaned: &str, thread: Option<u32>, group_no: Option<u32>, member_idx: Option<u32>) -> String {
    match (cfg.dest_type, kind) {
        (DestType::Fs, FileKind::Datafile) => cfg.fs_data_dir().join(cleaned).display().to_string(),
        (DestType::Fs, FileKind::Tempfile) => cfg.fs_data_dir().join(format!("temp_{cleaned}")).display().to_string(),
        (DestType::Fs, FileKind::RedoLog) => cfg
            .fs_data_dir()
            .join(format!(
                "redo_t{}_g{}_m{}_{cleaned}",
                thread.unwrap_or(1),
                group_no.unwrap_or(0),
                member_idx.unwrap_or(0)
            ))
            .display()
            .to_string(),
        (DestType::Asm, FileKind::Datafile | FileKind::Tempfile) => cfg.data_dg.as_rman_literal(),
        (DestType::Asm, FileKind::RedoLog) => cfg.data_dg.as_rman_literal(),
    }
}

/// Builds the transformation map from a discovery map's text, resolving
/// FS-mode name collisions with an incrementing `_<n>` disambiguator
/// (§3.2, §4.4).
pub fn build(cfg: &Config, discovery_text: &str) -> Result<FileTransformationMap, RmanError> {
    let rows = parse_discovery_map(discovery_text)?;
    let mut seen_fs_names: HashMap<(FileKind, String), u32> = HashMap::new();
    let mut entries = Vec::new();
    let mut redo_member_idx: HashMap<u32, u32> = HashMap::new();

    for row in rows {
        match row {
            RawRow::Datafile { file_no, path } => {
                let cleaned = disambiguate(&mut seen_fs_names, FileKind::Datafile, clean_name(&path, FileKind::Datafile));
                let dest = compute_dest(cfg, FileKind::Datafile, &cleaned, None, None, None);
                entries.push(FtmEntry { kind: FileKind::Datafile, id: file_no, thread: None, source_path: path, dest_path: dest });
            }
            RawRow::Tempfile { file_no, path } => {
                let cleaned = disambiguate(&mut seen_fs_names, FileKind::Tempfile, clean_name(&path, FileKind::Tempfile));
                let dest = compute_dest(cfg, FileKind::Tempfile, &cleaned, None, None, None);
                entries.push(FtmEntry { kind: FileKind::Tempfile, id: file_no, thread: None, source_path: path, dest_path: dest });
            }
            RawRow::Redo { group_no, member, thread } => {
                let member_idx = redo_member_idx.entry(group_no).or_insert(0);
                let cleaned = disambiguate(&mut seen_fs_names, FileKind::RedoLog, clean_name(&member, FileKind::RedoLog));
                let dest = compute_dest(cfg, FileKind::RedoLog, &cleaned, Some(thread), Some(group_no), Some(*member_idx));
                *member_idx += 1;
                entries.push(FtmEntry { kind: FileKind::RedoLog, id: group_no, thread: Some(thread), source_path: member, dest_path: dest });
            }
        }
    }
    Ok(FileTransformationMap { entries })
}

fn disambiguate(seen: &mut HashMap<(FileKind, String), u32>, kind: FileKind, cleaned: String) -> String {
    let key = (kind, cleaned.clone());
    let count = seen.entry(key).or_insert(0);
    *count += 1;
    if *count == 1 {
        cleaned
    } else {
        match cleaned.rsplit_once('.') {
            Some((base, ext)) => format!("{base}_{count}.{ext}"),
            None => format!("{cleaned}_{count}"),
        }
    }
}
