// Cache warm-up ahead of the comparison pass.
//
// Probes the IL cache for every file under every label a working tool
// could have produced, which pulls disk entries into memory. Never launches
// a disassembler and never writes to the cache.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

use super::runner::ProcessRunner;
use super::tools::{AttemptDescriptor, TargetForm, ToolCandidate};
use super::ToolContext;
use crate::cache::{worker_pool, IlCache};
use crate::error::CacheError;
use crate::utils::ThrottledProgress;

const PROBED_FORMS: [TargetForm; 2] = [TargetForm::FileName, TargetForm::AbsolutePath];

pub struct Prefetcher {
    candidates: Vec<ToolCandidate>,
    cache: Arc<IlCache>,
    context: Arc<ToolContext>,
    runner: Arc<dyn ProcessRunner>,
}

impl Prefetcher {
    pub fn new(
        candidates: Vec<ToolCandidate>,
        cache: Arc<IlCache>,
        context: Arc<ToolContext>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            candidates,
            cache,
            context,
            runner,
        }
    }

    /// Tools that are not blacklisted and report a version.
    fn viable_tools(&self) -> Vec<(&ToolCandidate, String)> {
        self.candidates
            .iter()
            .filter(|c| !self.context.failures.is_blacklisted(&c.tool_key()))
            .filter_map(|c| {
                self.context
                    .versions
                    .resolve(c, self.runner.as_ref())
                    .map(|v| (c, v))
            })
            .collect()
    }

    /// Warm the memory tier for `paths`; returns the number of cache hits.
    pub fn prefetch(&self, paths: &[PathBuf], max_workers: usize) -> Result<usize, CacheError> {
        let pool = worker_pool(max_workers)?;
        let tools = self.viable_tools();
        if tools.is_empty() || paths.is_empty() {
            debug!("nothing to prefetch");
            return Ok(0);
        }

        let hits = AtomicUsize::new(0);
        let progress = ThrottledProgress::new("prefetching IL cache", paths.len());

        pool.install(|| {
            paths.par_iter().for_each(|path| {
                let Ok(target) = std::path::absolute(path) else {
                    progress.tick();
                    return;
                };
                for (candidate, version) in &tools {
                    for form in PROBED_FORMS {
                        let attempt = AttemptDescriptor::direct(form);
                        let label = candidate.label(attempt, &target, Some(version.as_str()));
                        if self.cache.try_get(&target, &label).is_some() {
                            hits.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                progress.tick();
            });
        });

        progress.finish();
        let hits = hits.into_inner();
        info!(files = paths.len(), hits, "IL cache prefetch done");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{ok, FakeRunner};
    use super::super::tools::ToolFamily;
    use super::super::Disassembler;
    use super::*;
    use crate::cache::CacheSettings;
    use crate::hash::ContentHasher;
    use std::fs;
    use std::time::Duration;

    fn disk_cache(dir: &std::path::Path) -> Arc<IlCache> {
        Arc::new(IlCache::new(
            CacheSettings {
                disk_dir: Some(dir.to_path_buf()),
                ..CacheSettings::default()
            },
            Arc::new(ContentHasher::new()),
        ))
    }

    #[test]
    fn warms_memory_from_disk_without_disassembling() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let a = dir.path().join("A.dll");
        let b = dir.path().join("B.dll");
        fs::write(&a, b"assembly a").unwrap();
        fs::write(&b, b"assembly b").unwrap();
        let candidates = vec![ToolCandidate::new(ToolFamily::DotnetIldasm, "dotnet-ildasm")];

        // A previous run leaves A's IL on disk.
        let first_runner = Arc::new(FakeRunner::new(|_| ok(".assembly A\n")));
        let first = Disassembler::new(
            candidates.clone(),
            Some(disk_cache(&cache_dir)),
            Arc::new(ToolContext::new(3, Duration::from_secs(60))),
            first_runner,
        );
        first.disassemble(&a).unwrap();

        let cache = disk_cache(&cache_dir);
        let runner = Arc::new(FakeRunner::new(|_| ok("should not run")));
        let prefetcher = Prefetcher::new(
            candidates,
            cache.clone(),
            Arc::new(ToolContext::new(3, Duration::from_secs(60))),
            runner.clone(),
        );

        let hits = prefetcher.prefetch(&[a, b], 2).unwrap();
        assert_eq!(hits, 1);
        assert_eq!(cache.memory_len(), 1);
        assert!(runner.disassembly_calls().is_empty());
    }

    #[test]
    fn blacklisted_tools_are_not_probed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("A.dll");
        fs::write(&a, b"assembly a").unwrap();
        let context = Arc::new(ToolContext::new(1, Duration::from_secs(60)));
        context.failures.record_failure("dotnet-ildasm");
        let runner = Arc::new(FakeRunner::new(|_| ok("")));

        let prefetcher = Prefetcher::new(
            vec![ToolCandidate::new(ToolFamily::DotnetIldasm, "dotnet-ildasm")],
            disk_cache(&dir.path().join("cache")),
            context,
            runner.clone(),
        );
        assert_eq!(prefetcher.prefetch(&[a], 1).unwrap(), 0);
        assert!(runner.calls.lock().is_empty());
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let prefetcher = Prefetcher::new(
            Vec::new(),
            disk_cache(dir.path()),
            Arc::new(ToolContext::new(1, Duration::from_secs(60))),
            Arc::new(FakeRunner::new(|_| ok(""))),
        );
        assert!(matches!(
            prefetcher.prefetch(&[], 0),
            Err(CacheError::InvalidWorkerCount(0))
        ));
    }
}
