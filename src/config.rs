use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Entries older than this (measured from creation) are never served.
pub const IL_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_CACHE_DIR_NAME: &str = "ILCache";

/// Settings read from the optional JSON configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "EnableILCache")]
    pub enable_il_cache: bool,

    /// Blank means `ILCache` next to the executable.
    #[serde(rename = "ILCacheDirectoryAbsolutePath")]
    pub il_cache_directory: String,

    #[serde(rename = "ILCacheMaxMemoryEntries")]
    pub il_cache_max_memory_entries: usize,

    /// 0 = unlimited.
    #[serde(rename = "ILCacheMaxDiskFileCount")]
    pub il_cache_max_disk_file_count: usize,

    /// 0 = unlimited.
    #[serde(rename = "ILCacheMaxDiskMegabytes")]
    pub il_cache_max_disk_megabytes: u64,

    /// 0 = derive from CPU count.
    #[serde(rename = "MaxParallelism")]
    pub max_parallelism: usize,

    #[serde(rename = "DisassemblerFailureThreshold")]
    pub disassembler_failure_threshold: u32,

    #[serde(rename = "DisassemblerCooldownSeconds")]
    pub disassembler_cooldown_seconds: u64,

    #[serde(rename = "ILIgnoreLinePrefixes")]
    pub il_ignore_line_prefixes: Vec<String>,

    #[serde(rename = "IgnoredExtensions")]
    pub ignored_extensions: Vec<String>,

    #[serde(rename = "ShouldIncludeUnchangedFiles")]
    pub include_unchanged_files: bool,

    #[serde(rename = "ShouldOutputILText")]
    pub output_il_text: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_il_cache: true,
            il_cache_directory: String::new(),
            il_cache_max_memory_entries: 2000,
            il_cache_max_disk_file_count: 0,
            il_cache_max_disk_megabytes: 0,
            max_parallelism: 0,
            disassembler_failure_threshold: 3,
            disassembler_cooldown_seconds: 600,
            il_ignore_line_prefixes: vec![crate::il::MVID_PREFIX.to_string()],
            ignored_extensions: vec![".pdb".into(), ".cache".into()],
            include_unchanged_files: true,
            output_il_text: false,
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.il_cache_max_memory_entries == 0 {
            return Err(ConfigError::Invalid(
                "ILCacheMaxMemoryEntries must be at least 1".into(),
            ));
        }
        if self.disassembler_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "DisassemblerFailureThreshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn max_disk_bytes(&self) -> u64 {
        self.il_cache_max_disk_megabytes.saturating_mul(1024 * 1024)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.disassembler_cooldown_seconds)
    }

    /// Resolved cache directory; blank config means `<exe dir>/ILCache`.
    pub fn cache_directory(&self) -> PathBuf {
        let configured = self.il_cache_directory.trim();
        if !configured.is_empty() {
            return PathBuf::from(configured);
        }
        executable_dir().join(DEFAULT_CACHE_DIR_NAME)
    }
}

pub fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("nope.json")).unwrap();
        assert!(config.enable_il_cache);
        assert_eq!(config.il_cache_max_memory_entries, 2000);
        assert_eq!(config.il_cache_max_disk_file_count, 0);
        assert_eq!(config.il_ignore_line_prefixes, vec!["// MVID:".to_string()]);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "ILCacheMaxDiskFileCount": 3, "MaxParallelism": 2, "EnableILCache": false }"#,
        )
        .unwrap();

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.il_cache_max_disk_file_count, 3);
        assert_eq!(config.max_parallelism, 2);
        assert!(!config.enable_il_cache);
        assert_eq!(config.disassembler_failure_threshold, 3);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "DisassemblerFailureThreshold": 0 }"#).unwrap();

        let err = Config::load_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            Config::load_or_default(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let config = Config {
            il_cache_directory: "/tmp/il-cache".into(),
            ..Config::default()
        };
        assert_eq!(config.cache_directory(), PathBuf::from("/tmp/il-cache"));
        assert_eq!(
            Config {
                il_cache_max_disk_megabytes: 2,
                ..Config::default()
            }
            .max_disk_bytes(),
            2 * 1024 * 1024
        );
    }
}
