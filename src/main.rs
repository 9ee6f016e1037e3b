use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use ildiff::cli::{build_options, Args};
use ildiff::config::Config;
use ildiff::diff::{run_diff, DiffEngine};
use ildiff::logging::init_tracing;
use ildiff::report::write_report;
use ildiff::scanner::{scan_dir, ScanFilter};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let old_root = args.old_dir.canonicalize().context("Invalid old_dir")?;
    let new_root = args.new_dir.canonicalize().context("Invalid new_dir")?;
    let out_root = args.output_dir.clone();

    if old_root == new_root {
        anyhow::bail!("old_dir and new_dir cannot be the same directory.");
    }
    if out_root.exists() {
        let out_abs = out_root.canonicalize()?;
        if out_abs.starts_with(&old_root) || out_abs.starts_with(&new_root) {
            anyhow::bail!("output_dir cannot be inside old_dir/new_dir nor be equal to them.");
        }
    }

    let config_path = args.config_path();
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    args.apply_overrides(&mut config);
    let opts = build_options(&args, &config)?;
    info!(parallelism = opts.parallelism, il_cache = config.enable_il_cache, "starting");

    if opts.dry_run {
        println!("== DRY RUN ==");
        let filter = ScanFilter::new(opts.ignore_patterns.clone(), &opts.ignored_extensions);
        let scan_old = scan_dir(&old_root, &filter);
        let scan_new = scan_dir(&new_root, &filter);

        let only_old = scan_old.files.keys().filter(|k| !scan_new.files.contains_key(*k)).count();
        let only_new = scan_new.files.keys().filter(|k| !scan_old.files.contains_key(*k)).count();
        let common = scan_old.files.keys().filter(|k| scan_new.files.contains_key(*k)).count();

        println!("Files only in old (removed): {only_old}");
        println!("Files only in new (added):   {only_new}");
        println!("Common files (compared):     {common}");
        return Ok(());
    }

    fs::create_dir_all(&out_root)?;
    let engine = DiffEngine::from_config(&config, opts.il_compare);
    let outcome = run_diff(&old_root, &new_root, &out_root, &opts, &engine)?;
    let report = write_report(&out_root, &old_root, &new_root, &outcome, opts.include_unchanged)?;

    let c = &outcome.counters;
    println!("== ildiff: Summary ==");
    println!("Unchanged:       {}", c.unchanged);
    println!("Added:           {}", c.added);
    println!("Removed:         {}", c.removed);
    println!("Modified:        {}", c.modified);
    println!("Compared as IL:  {}", c.il_compared);
    println!("Errors:          {}", c.errors);
    println!("Report at:       {}", report.display());

    Ok(())
}
