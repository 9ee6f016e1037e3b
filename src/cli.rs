use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use glob::Pattern;

use crate::config::{executable_dir, Config, DEFAULT_CONFIG_FILE};
use crate::il::MVID_PREFIX;
use crate::utils::{effective_parallelism, is_network_path, parse_size};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Old build directory
    pub old_dir: PathBuf,

    /// New build directory
    pub new_dir: PathBuf,

    /// Output directory for the report
    pub output_dir: PathBuf,

    /// Glob patterns to ignore (can be repeated or comma separated)
    #[arg(short, long, value_delimiter = ',', num_args = 1..)]
    pub ignore: Vec<String>,

    /// Max size (in bytes) for text diff per file (e.g., 5MB, 102400)
    #[arg(short = 'S', long, default_value = "5MB")]
    pub max_text_size: String,

    /// JSON configuration file (defaults to config.json next to the executable)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Compare managed assemblies byte-wise only, without disassembling
    #[arg(long)]
    pub no_il: bool,

    /// Disable the IL cache for this run
    #[arg(long)]
    pub no_il_cache: bool,

    /// IL cache directory (overrides the config file)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Worker threads; 0 uses the CPU count
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Do not write anything; only print a summary of what would be done
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| executable_dir().join(DEFAULT_CONFIG_FILE))
    }

    /// Apply command-line overrides on top of the loaded config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if self.no_il_cache {
            config.enable_il_cache = false;
        }
        if let Some(dir) = &self.cache_dir {
            config.il_cache_directory = dir.display().to_string();
        }
        if let Some(parallelism) = self.parallelism {
            config.max_parallelism = parallelism;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub max_text_size: u64,
    pub ignore_patterns: Vec<Pattern>,
    pub ignored_extensions: Vec<String>,
    pub il_compare: bool,
    pub il_ignore_prefixes: Vec<String>,
    pub include_unchanged: bool,
    pub output_il_text: bool,
    /// Resolved worker count, never 0 once built from args.
    pub parallelism: usize,
    pub dry_run: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_text_size: 5_000_000,
            ignore_patterns: Vec::new(),
            ignored_extensions: Vec::new(),
            il_compare: true,
            il_ignore_prefixes: vec![MVID_PREFIX.to_string()],
            include_unchanged: true,
            output_il_text: false,
            parallelism: 1,
            dry_run: false,
        }
    }
}

pub fn build_options(args: &Args, config: &Config) -> Result<Options> {
    let patterns = args
        .ignore
        .iter()
        .map(|s| Pattern::new(s).with_context(|| format!("Invalid glob pattern: {s}")))
        .collect::<Result<Vec<_>>>()?;

    let on_network = is_network_path(&args.old_dir) || is_network_path(&args.new_dir);

    Ok(Options {
        max_text_size: parse_size(&args.max_text_size),
        ignore_patterns: patterns,
        ignored_extensions: config.ignored_extensions.clone(),
        il_compare: !args.no_il,
        il_ignore_prefixes: config.il_ignore_line_prefixes.clone(),
        include_unchanged: config.include_unchanged_files,
        output_il_text: config.output_il_text,
        parallelism: effective_parallelism(config.max_parallelism, on_network),
        dry_run: args.dry_run,
    })
}
