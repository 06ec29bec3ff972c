//! RMAN command-file generation (§4.4 "Script generation").
//!
//! Every script is wrapped in a `run { }` block bracketed by channel
//! allocation/release, mirroring the teacher's `dag::executor` pattern of
//! wrapping a unit of work with matching setup/teardown around a shared
//! resource (there: a worktree checkout; here: RMAN disk channels).

use super::map::{FileKind, FileTransformationMap};

/// `min(8, cpu_count)` clamped to a floor of 4, unless the caller overrides
/// it explicitly (§4.4 "Channel sizing").
pub fn channel_count(override_count: Option<u32>) -> u32 {
    if let Some(n) = override_count {
        return n.max(1);
    }
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4);
    cpus.min(8).max(4)
}

fn wrap_run_block(channels: u32, body: &str) -> String {
    let alloc: String = (1..=channels)
        .map(|c| format!("allocate channel c{c} device type disk;\n"))
        .collect();
    let release: String = (1..=channels)
        .rev()
        .map(|c| format!("release channel c{c};\n"))
        .collect();
    format!("run {{\n{alloc}{body}{release}}}\n")
}

fn newname_block(ftm: &FileTransformationMap) -> String {
    let mut out = String::new();
    for entry in ftm.non_redo() {
        let kind_word = match entry.kind {
            FileKind::Datafile => "datafile",
            FileKind::Tempfile => "tempfile",
            FileKind::RedoLog => unreachable!("non_redo() excludes redo entries"),
        };
        out.push_str(&format!(
            "set newname for {kind_word} {} to '{}';\n",
            entry.id, entry.dest_path
        ));
    }
    out
}

pub fn bootstrap(channels: u32, dbid: u64, control_file: &str) -> String {
    let body = format!(
        "set dbid {dbid};\nrestore spfile from autobackup;\nrestore controlfile to '{control_file}' from autobackup;\n"
    );
    wrap_run_block(channels, &body)
}

pub fn crosscheck(channels: u32) -> String {
    let body = "crosscheck backup;\ncrosscheck copy;\ndelete noprompt expired backup;\ndelete noprompt expired copy;\n";
    wrap_run_block(channels, body)
}

/// `catalog start with` sits inside the channel block; the subsequent
/// `list` commands run outside it (§4.4 item 3).
pub fn catalog(channels: u32, backup_root: &str) -> String {
    let body = format!("catalog start with '{backup_root}/' noprompt;\n");
    let mut out = wrap_run_block(channels, &body);
    out.push_str("list backup summary;\nlist archivelog all;\nlist incarnation;\n");
    out
}

pub fn preview(channels: u32, ftm: &FileTransformationMap) -> String {
    let mut body = newname_block(ftm);
    body.push_str("restore database preview summary;\n");
    wrap_run_block(channels, &body)
}

pub fn validate(channels: u32, ftm: &FileTransformationMap) -> String {
    let mut body = newname_block(ftm);
    body.push_str("restore database validate;\n");
    wrap_run_block(channels, &body)
}

#[derive(Debug, Clone, Copy)]
pub enum Pitr<'a> {
    None,
    UntilTime(&'a str),
    UntilScn(u64),
}

fn pitr_clause(pitr: Pitr<'_>) -> Option<String> {
    match pitr {
        Pitr::None => None,
        Pitr::UntilTime(t) => Some(format!(
            "set until time \"to_date('{t}','YYYY-MM-DD HH24:MI:SS')\";\n"
        )),
        Pitr::UntilScn(scn) => Some(format!("set until scn {scn};\n")),
    }
}

pub fn restore(channels: u32, ftm: &FileTransformationMap, pitr: Pitr<'_>) -> String {
    let mut body = String::new();
    if let Some(clause) = pitr_clause(pitr) {
        body.push_str(&clause);
    }
    body.push_str(&newname_block(ftm));
    body.push_str("restore database;\nswitch datafile all;\n");
    wrap_run_block(channels, &body)
}

pub fn recover(channels: u32, pitr: Pitr<'_>) -> String {
    let clause = match pitr {
        Pitr::None => "recover database;\n".to_string(),
        Pitr::UntilTime(t) => format!(
            "recover database until time \"to_date('{t}','YYYY-MM-DD HH24:MI:SS')\";\n"
        ),
        Pitr::UntilScn(scn) => format!("recover database until scn {scn};\n"),
    };
    wrap_run_block(channels, &clause)
}

/// Post-restore SQL (`07_post_restore.sql`): redo then tempfile renames,
/// then `alter database open resetlogs;` (§4.4).
pub fn post_restore_sql(ftm: &FileTransformationMap) -> String {
    let mut out = String::from("-- generated post-restore rename script\n");
    for entry in ftm.redo_logs() {
        out.push_str(&format!(
            "alter database rename file '{}' to '{}';\n",
            entry.source_path, entry.dest_path
        ));
    }
    for entry in ftm.tempfiles() {
        out.push_str(&format!(
            "alter database rename file '{}' to '{}';\n",
            entry.source_path, entry.dest_path
        ));
    }
    out.push_str("alter database open resetlogs;\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rman::map::{FileKind, FtmEntry};

    fn sample_ftm() -> FileTransformationMap {
        FileTransformationMap {
            entries: vec![
                FtmEntry {
                    kind: FileKind::Datafile,
                    id: 1,
                    thread: None,
                    source_path: "+DATA/ORCL/DATAFILE/system.259.1".into(),
                    dest_path: "/u02/oradata/orcl_clone/system.dbf".into(),
                },
                FtmEntry {
                    kind: FileKind::Tempfile,
                    id: 2,
                    thread: None,
                    source_path: "+DATA/ORCL/TEMPFILE/temp.260.1".into(),
                    dest_path: "/u02/oradata/orcl_clone/temp_temp.dbf".into(),
                },
                FtmEntry {
                    kind: FileKind::RedoLog,
                    id: 1,
                    thread: Some(1),
                    source_path: "+DATA/ORCL/ONLINELOG/group_1.261.1".into(),
                    dest_path: "/u02/oradata/orcl_clone/redo_t1_g1_m0_group1.log".into(),
                },
            ],
        }
    }

    #[test]
    fn channel_count_respects_override() {
        assert_eq!(channel_count(Some(2)), 2);
    }

    #[test]
    fn channel_count_has_floor_of_four() {
        assert!(channel_count(None) >= 4);
    }

    #[test]
    fn bootstrap_contains_dbid_and_channel_wrap() {
        let s = bootstrap(4, 1234567890, "/u02/oradata/orcl_clone/control01.ctl");
        assert!(s.contains("set dbid 1234567890;"));
        assert!(s.contains("allocate channel c1 device type disk;"));
        assert!(s.contains("release channel c4;"));
    }

    #[test]
    fn preview_skips_redo_entries() {
        let ftm = sample_ftm();
        let s = preview(4, &ftm);
        assert!(s.contains("set newname for datafile 1"));
        assert!(s.contains("set newname for tempfile 2"));
        assert!(!s.contains("redo"));
    }

    #[test]
    fn restore_includes_until_time_clause() {
        let ftm = sample_ftm();
        let s = restore(4, &ftm, Pitr::UntilTime("2026-01-16 14:30:00"));
        assert!(s.contains("set until time"));
        assert!(s.contains("switch datafile all;"));
    }

    #[test]
    fn recover_without_pitr_is_plain() {
        let s = recover(1, Pitr::None);
        assert_eq!(
            s,
            "run {\nallocate channel c1 device type disk;\nrecover database;\nrelease channel c1;\n}\n"
        );
    }

    #[test]
    fn post_restore_sql_renames_redo_then_temp_then_opens() {
        let ftm = sample_ftm();
        let s = post_restore_sql(&ftm);
        let redo_pos = s.find("group_1.261.1").unwrap();
        let temp_pos = s.find("temp.260.1").unwrap();
        let open_pos = s.find("open resetlogs").unwrap();
        assert!(redo_pos < temp_pos);
        assert!(temp_pos < open_pos);
    }
}
