//! Supporting utilities: system-memory sizing, duration formatting, and
//! small filesystem helpers shared across components (§4.6 step 5, §4.2).

use crate::config::MemorySize;
use crate::errors::PreconditionError;
use std::sync::OnceLock;
use std::time::Duration;

/// Parse the `Mem:` (procps) or `Mem.:` (busybox) row of `free -b` output
/// into `(total_bytes, available_bytes)`.
pub fn parse_free_output(output: &str) -> Option<(u64, u64)> {
    for line in output.lines() {
        let label = line.split_whitespace().next()?;
        if label == "Mem:" || label == "Mem.:" {
            let cols: Vec<&str> = line.split_whitespace().collect();
            // free -b: Mem: total used free shared buff/cache available
            let total: u64 = cols.get(1)?.parse().ok()?;
            let available: u64 = cols
                .last()
                .and_then(|s| s.parse().ok())
                .unwrap_or(total);
            return Some((total, available));
        }
    }
    None
}

/// Memory sizing result for Phase A step 5.
#[derive(Debug, Clone, Copy)]
pub struct MemoryPlan {
    pub sga: MemorySize,
    pub pga: MemorySize,
}

const MIN_AVAILABLE_GIB: u64 = 4;
const SGA_FLOOR: MemorySize = MemorySize {
    bytes: 2 * 1024 * 1024 * 1024,
};
const PGA_FLOOR: MemorySize = MemorySize {
    bytes: 1024 * 1024 * 1024,
};

/// Compute SGA/PGA targets per Phase A step 5. `sga_pct`/`pga_pct` default
/// to 45/20 when not given an explicit override pair.
pub fn compute_memory_plan(
    available_bytes: u64,
    sga_override: Option<MemorySize>,
    pga_override: Option<MemorySize>,
    sga_pct: u64,
    pga_pct: u64,
) -> Result<MemoryPlan, PreconditionError> {
    if let (Some(sga), Some(pga)) = (sga_override, pga_override) {
        return Ok(MemoryPlan { sga, pga });
    }

    let available_gib = available_bytes / (1024 * 1024 * 1024);
    if available_gib < MIN_AVAILABLE_GIB {
        return Err(PreconditionError::InsufficientMemory {
            available_gib,
            required_gib: MIN_AVAILABLE_GIB,
        });
    }

    let sga_bytes = available_bytes.saturating_mul(sga_pct) / 100;
    let pga_bytes = available_bytes.saturating_mul(pga_pct) / 100;

    let sga = MemorySize { bytes: sga_bytes }.max(SGA_FLOOR);
    let pga = MemorySize { bytes: pga_bytes }.max(PGA_FLOOR);

    Ok(MemoryPlan { sga, pga })
}

impl MemorySize {
    fn max(self, other: Self) -> Self {
        if self.bytes >= other.bytes {
            self
        } else {
            other
        }
    }
}

/// Format a duration the way C2 renders tool elapsed time: "Hh Mm Ss",
/// "Mm Ss", or "Ss".
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Bounded-depth walk used by backup discovery (§4.4) so a misconfigured
/// `BACKUP_ROOT` pointing at something enormous doesn't walk forever.
pub fn walk_bounded(
    root: &std::path::Path,
    max_depth: usize,
) -> impl Iterator<Item = walkdir::DirEntry> {
    walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
}

/// Ensure a directory exists, skipping ASM disk-group pseudo-paths (those
/// starting with `+`), per Phase A step 4.
pub fn ensure_dir_unless_asm(path: &std::path::Path) -> std::io::Result<()> {
    if path.starts_with("+") || path.to_string_lossy().starts_with('+') {
        return Ok(());
    }
    std::fs::create_dir_all(path)
}

fn pmon_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)^ora_pmon_([A-Za-z0-9_]+)$").unwrap())
}

/// SIDs of every live `ora_pmon_<sid>` process, by scanning `/proc/*/cmdline`
/// (Phase A step 4 "Enumerate active instances").
pub fn pmon_sids() -> Vec<String> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return out;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let text = String::from_utf8_lossy(&cmdline);
        let arg0 = text.split('\0').next().unwrap_or("");
        let base = arg0.rsplit('/').next().unwrap_or(arg0);
        if let Some(caps) = pmon_regex().captures(base) {
            out.push(caps[1].to_string());
        }
    }
    out
}

/// Whether a PMON process is live for `sid` (case-insensitive).
pub fn pmon_present(sid: &str) -> bool {
    pmon_sids().iter().any(|s| s.eq_ignore_ascii_case(sid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_free_output_reads_available_column() {
        let out = "              total        used        free      shared  buff/cache   available\nMem:     10737418240  1073741824  8589934592           0  1073741824  9663676416\n";
        let (total, available) = parse_free_output(out).unwrap();
        assert_eq!(total, 10737418240);
        assert_eq!(available, 9663676416);
    }

    #[test]
    fn parse_free_output_handles_busybox_label() {
        let out = "Mem.:     1048576    524288    524288\n";
        assert!(parse_free_output(out).is_some());
    }

    #[test]
    fn memory_plan_p4_ten_gib_case() {
        let plan = compute_memory_plan(10u64 * 1024 * 1024 * 1024, None, None, 45, 20).unwrap();
        assert_eq!(plan.sga.as_gib_floor(), 4);
        assert_eq!(plan.pga.as_gib_floor(), 2);
    }

    #[test]
    fn memory_plan_p4_three_gib_fails() {
        let err = compute_memory_plan(3u64 * 1024 * 1024 * 1024, None, None, 45, 20).unwrap_err();
        assert!(matches!(err, PreconditionError::InsufficientMemory { .. }));
    }

    #[test]
    fn memory_plan_overrides_bypass_sizing() {
        let plan = compute_memory_plan(
            1024,
            Some(MemorySize::gib(8)),
            Some(MemorySize::gib(3)),
            45,
            20,
        )
        .unwrap();
        assert_eq!(plan.sga.as_gib_floor(), 8);
        assert_eq!(plan.pga.as_gib_floor(), 3);
    }

    #[test]
    fn memory_plan_enforces_floor() {
        // 1% of 10 GiB is far below the 2 GiB / 1 GiB floors.
        let plan = compute_memory_plan(10u64 * 1024 * 1024 * 1024, None, None, 1, 1).unwrap();
        assert_eq!(plan.sga.as_gib_floor(), 2);
        assert_eq!(plan.pga.as_gib_floor(), 1);
    }

    #[test]
    fn format_duration_variants() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }

    #[test]
    fn pmon_sids_finds_no_matches_without_oracle_running() {
        // CI/dev boxes never run a real PMON process; this just exercises
        // the /proc walk without panicking.
        let sids = pmon_sids();
        assert!(!sids.iter().any(|s| s.eq_ignore_ascii_case("ORCL_NONEXISTENT")));
    }

    #[test]
    fn pmon_present_is_false_for_unknown_sid() {
        assert!(!pmon_present("DEFINITELY_NOT_RUNNING_SID"));
    }
}
