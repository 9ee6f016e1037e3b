use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::WalkDir;

const DEFAULT_IGNORED_NAMES: [&str; 4] = [".git", "__pycache__", ".DS_Store", "Thumbs.db"];

#[derive(Debug, Default)]
pub struct ScanFilter {
    pub patterns: Vec<Pattern>,
    /// Lower-case extensions with leading dot, e.g. ".pdb".
    pub ignored_extensions: Vec<String>,
}

impl ScanFilter {
    pub fn new(patterns: Vec<Pattern>, ignored_extensions: &[String]) -> Self {
        let ignored_extensions = ignored_extensions
            .iter()
            .map(|e| {
                let e = e.trim().to_lowercase();
                if e.starts_with('.') {
                    e
                } else {
                    format!(".{e}")
                }
            })
            .collect();
        Self {
            patterns,
            ignored_extensions,
        }
    }

    fn is_ignored(&self, rel: &Path, is_file: bool) -> bool {
        let name = rel.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if DEFAULT_IGNORED_NAMES.contains(&name) {
            return true;
        }
        if is_file {
            let lower = name.to_lowercase();
            if self.ignored_extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
                return true;
            }
        }
        let s_rel = rel.to_string_lossy().replace('\\', "/");
        self.patterns
            .iter()
            .any(|pat| pat.matches(&s_rel) || pat.matches(name))
    }
}

#[derive(Debug)]
pub struct ScanResult {
    pub files: BTreeMap<PathBuf, PathBuf>, // rel -> abs
}

pub fn scan_dir(root: &Path, filter: &ScanFilter) -> ScanResult {
    let mut files = BTreeMap::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker
        .filter_entry(|e| match e.path().strip_prefix(root) {
            Ok(rel) if rel == Path::new("") => true,
            Ok(rel) => !filter.is_ignored(rel, e.file_type().is_file()),
            Err(_) => true,
        })
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Ok(rel) = path.strip_prefix(root) {
            files.insert(rel.to_path_buf(), path.to_path_buf());
        }
    }

    ScanResult { files }
}
