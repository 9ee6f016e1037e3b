// Markdown summary of a comparison run.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cache::CacheStats;
use crate::diff::{CompareMethod, DiffOutcome, FileDiff, FileStatus};

pub const REPORT_FILE_NAME: &str = "diff_report.md";

fn method_name(method: Option<CompareMethod>) -> &'static str {
    match method {
        Some(CompareMethod::Hash) => "hash",
        Some(CompareMethod::Il) => "IL",
        Some(CompareMethod::Text) => "text",
        Some(CompareMethod::Binary) => "binary",
        Some(CompareMethod::Error) => "error",
        None => "-",
    }
}

fn section_title(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Added => "Added",
        FileStatus::Removed => "Removed",
        FileStatus::Modified => "Modified",
        FileStatus::Unchanged => "Unchanged",
    }
}

fn file_line(file: &FileDiff) -> String {
    let mut line = format!("- `{}`", file.rel.display());
    if file.method.is_some() {
        let _ = write!(line, " ({})", method_name(file.method));
    }
    if let Some(label) = &file.tool_label {
        let _ = write!(line, " via `{label}`");
    }
    if let Some(detail) = &file.detail {
        let _ = write!(line, ": {}", detail.replace('\n', " "));
    }
    line
}

fn cache_section(out: &mut String, stats: &CacheStats) {
    let _ = writeln!(out, "## IL Cache\n");
    let _ = writeln!(out, "| Counter | Value |\n|---|---|");
    for (name, value) in [
        ("Hits", stats.hits),
        ("Disk hits", stats.disk_hits),
        ("Misses", stats.misses),
        ("Stores", stats.stores),
        ("Evictions", stats.evictions),
        ("Expirations", stats.expirations),
        ("Disk trims", stats.disk_trims),
    ] {
        let _ = writeln!(out, "| {name} | {value} |");
    }
    out.push('\n');
}

pub fn render(old_root: &Path, new_root: &Path, outcome: &DiffOutcome, include_unchanged: bool) -> String {
    let c = &outcome.counters;
    let mut out = String::new();
    let _ = writeln!(out, "# Folder Diff Report\n");
    let _ = writeln!(out, "- Old: `{}`", old_root.display());
    let _ = writeln!(out, "- New: `{}`\n", new_root.display());

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "| Status | Count |\n|---|---|");
    let _ = writeln!(out, "| Unchanged | {} |", c.unchanged);
    let _ = writeln!(out, "| Added | {} |", c.added);
    let _ = writeln!(out, "| Removed | {} |", c.removed);
    let _ = writeln!(out, "| Modified | {} |", c.modified);
    let _ = writeln!(out, "| Compared as IL | {} |", c.il_compared);
    let _ = writeln!(out, "| Errors | {} |\n", c.errors);

    let mut statuses = vec![FileStatus::Added, FileStatus::Removed, FileStatus::Modified];
    if include_unchanged {
        statuses.push(FileStatus::Unchanged);
    }
    for status in statuses {
        let files: Vec<&FileDiff> = outcome.files.iter().filter(|f| f.status == status).collect();
        if files.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {}\n", section_title(status));
        for file in files {
            out.push_str(&file_line(file));
            out.push('\n');
        }
        out.push('\n');
    }

    if let Some(stats) = &outcome.cache_stats {
        cache_section(&mut out, stats);
    }
    out
}

/// Write the report into `out_root`, returning its path.
pub fn write_report(
    out_root: &Path,
    old_root: &Path,
    new_root: &Path,
    outcome: &DiffOutcome,
    include_unchanged: bool,
) -> Result<PathBuf> {
    fs::create_dir_all(out_root)
        .with_context(|| format!("cannot create output dir {}", out_root.display()))?;
    let path = out_root.join(REPORT_FILE_NAME);
    fs::write(&path, render(old_root, new_root, outcome, include_unchanged))
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Counters;

    fn entry(rel: &str, status: FileStatus, method: Option<CompareMethod>) -> FileDiff {
        FileDiff {
            rel: PathBuf::from(rel),
            status,
            method,
            tool_label: None,
            detail: None,
        }
    }

    fn outcome() -> DiffOutcome {
        let mut il = entry("bin/A.dll", FileStatus::Modified, Some(CompareMethod::Il));
        il.tool_label = Some("dotnet-ildasm A.dll (version: 1.0)".into());
        DiffOutcome {
            files: vec![
                il,
                entry("bin/B.dll", FileStatus::Unchanged, Some(CompareMethod::Hash)),
                entry("new.txt", FileStatus::Added, None),
            ],
            counters: Counters {
                unchanged: 1,
                added: 1,
                modified: 1,
                il_compared: 1,
                ..Counters::default()
            },
            cache_stats: Some(CacheStats {
                hits: 4,
                ..CacheStats::default()
            }),
        }
    }

    #[test]
    fn lists_sections_labels_and_cache_stats() {
        let text = render(Path::new("old"), Path::new("new"), &outcome(), true);
        assert!(text.contains("| Modified | 1 |"));
        assert!(text.contains("## Added\n\n- `new.txt`\n"));
        assert!(text.contains("- `bin/A.dll` (IL) via `dotnet-ildasm A.dll (version: 1.0)`"));
        assert!(text.contains("## Unchanged"));
        assert!(text.contains("| Hits | 4 |"));
        assert!(!text.contains("## Removed"));
    }

    #[test]
    fn unchanged_section_can_be_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report");
        let path = write_report(&out, Path::new("old"), Path::new("new"), &outcome(), false).unwrap();

        assert_eq!(path, out.join(REPORT_FILE_NAME));
        let text = fs::read_to_string(path).unwrap();
        assert!(!text.contains("## Unchanged"));
        assert!(text.contains("| Unchanged | 1 |"));
    }
}
