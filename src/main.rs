use std::path::PathBuf;

use anyhow::{Context, Result};

use mlb_datasync::config::SyncConfig;
use mlb_datasync::datasets;
use mlb_datasync::runlog::RunLog;
use mlb_datasync::runner::{self, DatasetStatus, Step};
use mlb_datasync::source::MlbStatsSource;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        print_usage();
        return Ok(());
    }

    let dry_run = has_flag(&args, "--dry-run");
    let test_mode = has_flag(&args, "--test");
    let force_full = has_flag(&args, "--force-full");
    let simulate_year = match parse_value_arg(&args, "--simulate-year") {
        Some(raw) => Some(
            raw.parse::<i32>()
                .with_context(|| format!("--simulate-year expects a year, got {raw:?}"))?,
        ),
        None => None,
    };
    let data_dir = parse_value_arg(&args, "--data-dir").map(PathBuf::from);

    let root = std::env::current_dir().context("resolve working directory")?;
    let config = SyncConfig::build(&root, dry_run, test_mode, simulate_year, force_full, data_dir);

    let mut log = RunLog::open(&config.log_path, config.mode_prefix())?;
    let source = MlbStatsSource::from_env();
    let report = runner::run(&config, &datasets::registry(), &source, &mut log);

    println!("Dataset sync complete ({})", config.mode_label());
    println!("Data dir: {}", config.data_dir.display());
    for outcome in &report.outcomes {
        match outcome.status {
            DatasetStatus::Done => println!(
                "{}: {} rows ({} seasons fetched)",
                outcome.dataset,
                outcome.rows_after,
                outcome.seasons_fetched.len()
            ),
            DatasetStatus::Failed => println!(
                "{}: FAILED at {}: {}",
                outcome.dataset,
                outcome.failed_step.map(Step::as_str).unwrap_or("?"),
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    if !report.all_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_usage() {
    println!("Usage: mlb_datasync [OPTIONS]");
    println!();
    println!("Incrementally sync the season datasets against the stats APIs.");
    println!();
    println!("  --dry-run             report intended changes, write nothing");
    println!("  --test                use test_data/ instead of the production files");
    println!("  --simulate-year N     treat N as the current season");
    println!("  --force-full          replan every season, ignoring what is on disk");
    println!("  --data-dir PATH       override the dataset directory");
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn parse_value_arg(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
        {
            let trimmed = next.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
