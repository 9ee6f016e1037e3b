use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;
use similar::{ChangeTag, TextDiff};
use tracing::{info, warn};

use crate::cache::{precompute_hashes, worker_pool, CacheSettings, CacheStats, IlCache};
use crate::cli::Options;
use crate::config::Config;
use crate::disasm::tools::home_dir;
use crate::disasm::{
    default_candidates, Disassembler, Prefetcher, ProcessRunner, SystemRunner, ToolContext,
};
use crate::hash::ContentHasher;
use crate::il::{filtered_text, il_equal};
use crate::pe::is_managed_executable;
use crate::scanner::{scan_dir, ScanFilter};
use crate::utils::{is_probably_binary, read_text_best_effort};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileStatus {
    Unchanged,
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMethod {
    Hash,
    Il,
    Text,
    Binary,
    Error,
}

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub rel: PathBuf,
    pub status: FileStatus,
    pub method: Option<CompareMethod>,
    pub tool_label: Option<String>,
    pub detail: Option<String>,
}

impl FileDiff {
    fn new(rel: &Path, status: FileStatus) -> Self {
        Self {
            rel: rel.to_path_buf(),
            status,
            method: None,
            tool_label: None,
            detail: None,
        }
    }

    fn compared(rel: &Path, status: FileStatus, method: CompareMethod) -> Self {
        Self {
            method: Some(method),
            ..Self::new(rel, status)
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Counters {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub il_compared: usize,
    pub errors: usize,
}

impl Counters {
    fn tally(files: &[FileDiff]) -> Self {
        let mut counters = Counters::default();
        for file in files {
            match file.status {
                FileStatus::Unchanged => counters.unchanged += 1,
                FileStatus::Added => counters.added += 1,
                FileStatus::Removed => counters.removed += 1,
                FileStatus::Modified => counters.modified += 1,
            }
            match file.method {
                Some(CompareMethod::Il) => counters.il_compared += 1,
                Some(CompareMethod::Error) => counters.errors += 1,
                _ => {}
            }
        }
        counters
    }
}

#[derive(Debug)]
pub struct DiffOutcome {
    pub files: Vec<FileDiff>,
    pub counters: Counters,
    pub cache_stats: Option<CacheStats>,
}

/// Shared state for one comparison run.
pub struct DiffEngine {
    hasher: Arc<ContentHasher>,
    cache: Option<Arc<IlCache>>,
    disassembler: Option<Disassembler>,
    prefetcher: Option<Prefetcher>,
}

impl DiffEngine {
    pub fn new(
        hasher: Arc<ContentHasher>,
        cache: Option<Arc<IlCache>>,
        disassembler: Option<Disassembler>,
        prefetcher: Option<Prefetcher>,
    ) -> Self {
        Self {
            hasher,
            cache,
            disassembler,
            prefetcher,
        }
    }

    /// Engine backed by real disassembler processes.
    pub fn from_config(config: &Config, il_compare: bool) -> Self {
        let hasher = Arc::new(ContentHasher::new());
        let cache = config.enable_il_cache.then(|| {
            Arc::new(IlCache::new(
                CacheSettings::from_config(config),
                hasher.clone(),
            ))
        });
        if !il_compare {
            return Self::new(hasher, cache, None, None);
        }

        let context = Arc::new(ToolContext::from_config(config));
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
        let candidates = default_candidates(home_dir().as_deref());
        let prefetcher = cache.as_ref().map(|cache| {
            Prefetcher::new(
                candidates.clone(),
                cache.clone(),
                context.clone(),
                runner.clone(),
            )
        });
        let disassembler = Disassembler::new(candidates, cache.clone(), context, runner);
        Self::new(hasher, cache, Some(disassembler), prefetcher)
    }

    fn precompute(&self, paths: &[PathBuf], workers: usize) -> Result<()> {
        let result = match &self.cache {
            Some(cache) => cache.precompute(paths, workers),
            None => precompute_hashes(&self.hasher, paths, workers),
        };
        result.context("hash precompute")
    }
}

pub fn run_diff(
    old_root: &Path,
    new_root: &Path,
    out_root: &Path,
    opts: &Options,
    engine: &DiffEngine,
) -> Result<DiffOutcome> {
    let filter = ScanFilter::new(opts.ignore_patterns.clone(), &opts.ignored_extensions);
    let scan_old = scan_dir(old_root, &filter);
    let scan_new = scan_dir(new_root, &filter);
    info!(
        old = scan_old.files.len(),
        new = scan_new.files.len(),
        "scanned directory trees"
    );

    let mut files = Vec::new();
    for rel in scan_old.files.keys() {
        if !scan_new.files.contains_key(rel) {
            files.push(FileDiff::new(rel, FileStatus::Removed));
        }
    }
    for rel in scan_new.files.keys() {
        if !scan_old.files.contains_key(rel) {
            files.push(FileDiff::new(rel, FileStatus::Added));
        }
    }

    let common: Vec<(&PathBuf, &PathBuf, &PathBuf)> = scan_old
        .files
        .iter()
        .filter_map(|(rel, old)| scan_new.files.get(rel).map(|new| (rel, old, new)))
        .collect();

    let all_paths: Vec<PathBuf> = common
        .iter()
        .flat_map(|(_, old, new)| [(*old).clone(), (*new).clone()])
        .collect();
    engine.precompute(&all_paths, opts.parallelism)?;

    if let Some(prefetcher) = &engine.prefetcher {
        let managed: Vec<PathBuf> = all_paths
            .iter()
            .filter(|p| is_managed_executable(p))
            .cloned()
            .collect();
        prefetcher
            .prefetch(&managed, opts.parallelism)
            .context("IL cache prefetch")?;
    }

    let pool = worker_pool(opts.parallelism).context("comparison worker pool")?;
    let compared: Vec<FileDiff> = pool.install(|| {
        common
            .par_iter()
            .map(|(rel, old, new)| compare_file(rel, old, new, out_root, opts, engine))
            .collect()
    });
    files.extend(compared);
    files.sort_by(|a, b| a.rel.cmp(&b.rel).then(a.status.cmp(&b.status)));

    let counters = Counters::tally(&files);
    let cache_stats = engine.cache.as_ref().map(|c| c.stats());
    if let Some(stats) = &cache_stats {
        info!(
            hits = stats.hits,
            misses = stats.misses,
            stores = stats.stores,
            evictions = stats.evictions,
            expirations = stats.expirations,
            "IL cache statistics"
        );
    }

    Ok(DiffOutcome {
        files,
        counters,
        cache_stats,
    })
}

fn compare_file(
    rel: &Path,
    old: &Path,
    new: &Path,
    out_root: &Path,
    opts: &Options,
    engine: &DiffEngine,
) -> FileDiff {
    let hashes = engine
        .hasher
        .hash(old)
        .and_then(|h_old| engine.hasher.hash(new).map(|h_new| h_old == h_new));
    match hashes {
        Ok(true) => return FileDiff::compared(rel, FileStatus::Unchanged, CompareMethod::Hash),
        Ok(false) => {}
        Err(err) => {
            warn!(path = %rel.display(), error = %err, "cannot hash file");
            return FileDiff {
                detail: Some(err.to_string()),
                ..FileDiff::compared(rel, FileStatus::Modified, CompareMethod::Error)
            };
        }
    }

    if let Some(disassembler) = &engine.disassembler {
        if is_managed_executable(old) && is_managed_executable(new) {
            return compare_il(rel, old, new, out_root, opts, disassembler);
        }
    }

    let too_large = fs::metadata(new).map_or(true, |m| m.len() > opts.max_text_size);
    if !too_large && !is_probably_binary(old) && !is_probably_binary(new) {
        if let Some(detail) = text_change_summary(old, new) {
            return FileDiff {
                detail: Some(detail),
                ..FileDiff::compared(rel, FileStatus::Modified, CompareMethod::Text)
            };
        }
    }
    FileDiff::compared(rel, FileStatus::Modified, CompareMethod::Binary)
}

fn compare_il(
    rel: &Path,
    old: &Path,
    new: &Path,
    out_root: &Path,
    opts: &Options,
    disassembler: &Disassembler,
) -> FileDiff {
    let result = disassembler
        .disassemble(old)
        .and_then(|o| disassembler.disassemble(new).map(|n| (o, n)));
    let (old_il, new_il) = match result {
        Ok(pair) => pair,
        Err(err) => {
            warn!(path = %rel.display(), error = %err, "IL comparison failed");
            return FileDiff {
                detail: Some(failure_detail(&err)),
                ..FileDiff::compared(rel, FileStatus::Modified, CompareMethod::Error)
            };
        }
    };

    let equal = il_equal(&old_il.il_text, &new_il.il_text, &opts.il_ignore_prefixes);
    let status = if equal {
        FileStatus::Unchanged
    } else {
        FileStatus::Modified
    };
    let detail = (old_il.tool_label != new_il.tool_label)
        .then(|| format!("old side disassembled with `{}`", old_il.tool_label));

    if !equal && opts.output_il_text {
        for (side, text) in [("old", &old_il.il_text), ("new", &new_il.il_text)] {
            let filtered = filtered_text(text, &opts.il_ignore_prefixes);
            if let Err(err) = write_il_text(out_root, side, rel, &filtered) {
                warn!(path = %rel.display(), error = %err, "cannot write IL text");
            }
        }
    }

    FileDiff {
        tool_label: Some(new_il.tool_label),
        detail,
        ..FileDiff::compared(rel, status, CompareMethod::Il)
    }
}

fn write_il_text(out_root: &Path, side: &str, rel: &Path, text: &str) -> std::io::Result<()> {
    let mut dst = out_root.join("IL").join(side).join(rel);
    let mut name = dst.file_name().unwrap_or_default().to_os_string();
    name.push(".il");
    dst.set_file_name(name);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dst, text)
}

fn text_change_summary(old: &Path, new: &Path) -> Option<String> {
    let old_text = read_text_best_effort(old).ok()?;
    let new_text = read_text_best_effort(new).ok()?;
    let diff = TextDiff::from_lines(&old_text, &new_text);

    let (mut inserted, mut deleted) = (0usize, 0usize);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => inserted += 1,
            ChangeTag::Delete => deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    Some(format!("+{inserted} -{deleted} lines"))
}

/// Top-level message plus the last attempt's error, which already
/// renders its own cause.
fn failure_detail(err: &dyn std::error::Error) -> String {
    match err.source() {
        Some(cause) => format!("{err} Last attempt: {cause}"),
        None => err.to_string(),
    }
}
