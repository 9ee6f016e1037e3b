// Two-tier IL result cache.
//
// Keys are `<content hash>_<tool label>`, so a renamed but unchanged file is
// still a hit. The memory tier is bounded (LRU by last access) and entries
// expire a fixed time after creation, checked lazily on read. The optional
// disk tier mirrors every freshly produced entry as `<sanitized key>.ilcache`
// and is trimmed by file count and total size, oldest modification first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{Config, IL_CACHE_TTL};
use crate::error::CacheError;
use crate::hash::{short_digest, ContentHasher};
use crate::utils::ThrottledProgress;

pub const CACHE_FILE_EXTENSION: &str = "ilcache";
pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 2000;

const KEY_SEPARATOR: char = '_';
const PLACEHOLDER: char = '_';
const MAX_FILE_STEM_BYTES: usize = 180;
const STEM_HEAD_BYTES: usize = 100;
const STEM_TAIL_BYTES: usize = 50;
const STEM_MARKER: &str = "~~";
const STEM_DIGEST_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_memory_entries: usize,
    pub ttl: Duration,
    /// `None` keeps the cache memory-only.
    pub disk_dir: Option<PathBuf>,
    /// 0 = unlimited.
    pub max_disk_files: usize,
    /// 0 = unlimited.
    pub max_disk_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_memory_entries: DEFAULT_MAX_MEMORY_ENTRIES,
            ttl: IL_CACHE_TTL,
            disk_dir: None,
            max_disk_files: 0,
            max_disk_bytes: 0,
        }
    }
}

impl CacheSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_memory_entries: config.il_cache_max_memory_entries.max(1),
            ttl: IL_CACHE_TTL,
            disk_dir: Some(config.cache_directory()),
            max_disk_files: config.il_cache_max_disk_file_count,
            max_disk_bytes: config.max_disk_bytes(),
        }
    }
}

#[derive(Debug)]
struct MemoryEntry {
    il_text: String,
    created_at: Instant,
    // Logical access clock; larger is more recent.
    last_access: AtomicU64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    disk_hits: AtomicU64,
    disk_trims: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub disk_hits: u64,
    pub disk_trims: u64,
}

pub struct IlCache {
    settings: CacheSettings,
    hasher: Arc<ContentHasher>,
    memory: DashMap<String, MemoryEntry>,
    clock: AtomicU64,
    eviction_lock: Mutex<()>,
    disk_lock: Mutex<()>,
    counters: Counters,
}

impl IlCache {
    pub fn new(settings: CacheSettings, hasher: Arc<ContentHasher>) -> Self {
        if let Some(dir) = &settings.disk_dir {
            if let Err(err) = fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %err, "cannot create IL cache directory");
            }
        }
        Self {
            settings,
            hasher,
            memory: DashMap::new(),
            clock: AtomicU64::new(0),
            eviction_lock: Mutex::new(()),
            disk_lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    #[cfg(test)]
    fn hasher(&self) -> &Arc<ContentHasher> {
        &self.hasher
    }

    /// Cached IL for `path` as produced by `tool_label`, if any.
    pub fn try_get(&self, path: &Path, tool_label: &str) -> Option<String> {
        let key = self.key_for(path, tool_label)?;

        if let Some(entry) = self.memory.get(&key) {
            if entry.created_at.elapsed() < self.settings.ttl {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.il_text.clone());
            }
            drop(entry);
            let ttl = self.settings.ttl;
            if self
                .memory
                .remove_if(&key, |_, e| e.created_at.elapsed() >= ttl)
                .is_some()
            {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "IL cache entry expired");
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(text) = self.read_disk(&key) {
            self.insert_memory(key, text.clone());
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
            return Some(text);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store IL produced by `tool_label` for `path`. Empty text is ignored.
    pub fn set(&self, path: &Path, tool_label: &str, il_text: &str) {
        if il_text.is_empty() {
            return;
        }
        let Some(key) = self.key_for(path, tool_label) else {
            return;
        };

        self.insert_memory(key.clone(), il_text.to_string());
        self.counters.stores.fetch_add(1, Ordering::Relaxed);

        if self.settings.disk_dir.is_some() {
            self.write_disk(&key, il_text);
            self.enforce_disk_quota();
        }
    }

    /// Hash every path up front on `max_workers` threads.
    ///
    /// Files that cannot be read are logged and skipped; they are hashed
    /// lazily later if anyone asks.
    pub fn precompute(&self, paths: &[PathBuf], max_workers: usize) -> Result<(), CacheError> {
        precompute_hashes(&self.hasher, paths, max_workers)
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            stores: c.stores.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            disk_trims: c.disk_trims.load(Ordering::Relaxed),
        }
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn disk_path_for_key(&self, key: &str) -> Option<PathBuf> {
        self.settings
            .disk_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{CACHE_FILE_EXTENSION}", sanitize_key(key))))
    }

    fn key_for(&self, path: &Path, tool_label: &str) -> Option<String> {
        match self.hasher.hash(path) {
            Ok(hash) => Some(cache_key(&hash, tool_label)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot hash file for IL cache");
                None
            }
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn insert_memory(&self, key: String, il_text: String) {
        let entry = MemoryEntry {
            il_text,
            created_at: Instant::now(),
            last_access: AtomicU64::new(self.tick()),
        };

        let _guard = self.eviction_lock.lock();
        if !self.memory.contains_key(&key) {
            while self.memory.len() >= self.settings.max_memory_entries {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
        self.memory.insert(key, entry);
    }

    // Caller holds `eviction_lock`.
    fn evict_oldest(&self) -> bool {
        let oldest = self
            .memory
            .iter()
            .min_by_key(|e| e.value().last_access.load(Ordering::Relaxed))
            .map(|e| e.key().clone());

        let Some(key) = oldest else {
            return false;
        };
        if self.memory.remove(&key).is_none() {
            return false;
        }
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "evicted IL cache entry");

        if let Some(path) = self.disk_path_for_key(&key) {
            let _disk = self.disk_lock.lock();
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot delete evicted IL cache file")
                }
            }
        }
        true
    }

    fn read_disk(&self, key: &str) -> Option<String> {
        let path = self.disk_path_for_key(key)?;
        match fs::read_to_string(&path) {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read IL cache file");
                None
            }
        }
    }

    fn write_disk(&self, key: &str, il_text: &str) {
        let Some(path) = self.disk_path_for_key(key) else {
            return;
        };
        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&path, il_text));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "cannot write IL cache file");
        }
    }

    fn enforce_disk_quota(&self) {
        let max_files = self.settings.max_disk_files;
        let max_bytes = self.settings.max_disk_bytes;
        if max_files == 0 && max_bytes == 0 {
            return;
        }
        let Some(dir) = &self.settings.disk_dir else {
            return;
        };

        let _guard = self.disk_lock.lock();
        let mut files = match list_cache_files(dir) {
            Ok(files) => files,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "cannot list IL cache directory");
                return;
            }
        };
        files.sort_by_key(|f| f.modified);

        let mut count = files.len();
        let mut bytes: u64 = files.iter().map(|f| f.size).sum();
        let over = |count: usize, bytes: u64| {
            (max_files > 0 && count > max_files) || (max_bytes > 0 && bytes > max_bytes)
        };

        let mut removed = 0u64;
        for file in &files {
            if !over(count, bytes) {
                break;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    count -= 1;
                    bytes = bytes.saturating_sub(file.size);
                    removed += 1;
                }
                Err(err) => {
                    warn!(path = %file.path.display(), error = %err, "cannot trim IL cache file")
                }
            }
        }

        if removed > 0 {
            self.counters.disk_trims.fetch_add(removed, Ordering::Relaxed);
            debug!(removed, remaining = count, bytes, "trimmed IL disk cache");
        }
    }
}

struct CacheFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

fn list_cache_files(dir: &Path) -> io::Result<Vec<CacheFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CACHE_FILE_EXTENSION) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        files.push(CacheFile {
            path,
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(files)
}

pub fn cache_key(content_hash: &str, tool_label: &str) -> String {
    format!("{content_hash}{KEY_SEPARATOR}{tool_label}")
}

/// File-name-safe form of a cache key, shortened when too long.
pub fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => PLACEHOLDER,
            c if c.is_control() => PLACEHOLDER,
            c => c,
        })
        .collect();

    if cleaned.len() < MAX_FILE_STEM_BYTES {
        return cleaned;
    }

    let head = floor_char_boundary(&cleaned, STEM_HEAD_BYTES);
    let tail = ceil_char_boundary(&cleaned, cleaned.len() - STEM_TAIL_BYTES);
    format!(
        "{}{STEM_MARKER}{}{PLACEHOLDER}{}",
        &cleaned[..head],
        &cleaned[tail..],
        short_digest(key, STEM_DIGEST_LEN)
    )
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Hash `paths` into `hasher` on a pool of `max_workers` threads.
pub fn precompute_hashes(
    hasher: &ContentHasher,
    paths: &[PathBuf],
    max_workers: usize,
) -> Result<(), CacheError> {
    let pool = worker_pool(max_workers)?;
    let progress = ThrottledProgress::new("hashing", paths.len());

    pool.install(|| {
        paths.par_iter().for_each(|path| {
            if let Err(err) = hasher.hash(path) {
                warn!(path = %path.display(), error = %err, "skipping hash precompute");
            }
            progress.tick();
        });
    });

    progress.finish();
    info!(memoized = hasher.len(), "content hashes precomputed");
    Ok(())
}

pub(crate) fn worker_pool(max_workers: usize) -> Result<rayon::ThreadPool, CacheError> {
    if max_workers == 0 {
        return Err(CacheError::InvalidWorkerCount(max_workers));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers)
        .build()
        .map_err(|e| CacheError::Pool(e.to_string()))
}
