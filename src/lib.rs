//
// lib.rs
// ildiff
//
// Library entry: directory comparison that treats managed assemblies as equal when their disassembled IL matches, backed by a two-tier IL cache.
//
// Thales Matheus Mendonça Santos - November 2025
//
// Public crate interface: re-export modules used by the binary and tests.
pub mod cache;
pub mod cli;
pub mod config;
pub mod diff;
pub mod disasm;
pub mod error;
pub mod hash;
pub mod il;
pub mod logging;
pub mod pe;
pub mod report;
pub mod scanner;
pub mod utils;

pub use cache::{CacheSettings, CacheStats, IlCache};
pub use cli::{build_options, Args, Options};
pub use config::Config;
pub use diff::{run_diff, CompareMethod, Counters, DiffEngine, DiffOutcome, FileDiff, FileStatus};
pub use disasm::{Disassembler, Disassembly, Prefetcher, ToolContext};
pub use error::{CacheError, ConfigError, DisassembleError};
pub use hash::ContentHasher;
pub use pe::is_managed_executable;
pub use scanner::{scan_dir, ScanFilter, ScanResult};
