use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::backup;
use crate::config::SyncConfig;
use crate::datasets::DatasetDescriptor;
use crate::fetch::FetchError;
use crate::inventory::{self, plan_seasons};
use crate::merge;
use crate::runlog::RunLog;
use crate::source::{StatsSource, fetch_seasons};
use crate::table::{self, SchemaError};

/// Stage a dataset was in when it failed. Kept past DONE only in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Scanning,
    Fetching,
    Merging,
    BackingUp,
    Writing,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Scanning => "scan",
            Step::Fetching => "fetch",
            Step::Merging => "merge",
            Step::BackingUp => "backup",
            Step::Writing => "write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetStatus {
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub dataset: &'static str,
    pub status: DatasetStatus,
    pub seasons_fetched: Vec<i32>,
    pub rows_before: usize,
    pub rows_after: usize,
    pub backup_path: Option<PathBuf>,
    pub failed_step: Option<Step>,
    pub error: Option<String>,
}

impl DatasetOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == DatasetStatus::Done
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub dry_run: bool,
    pub outcomes: Vec<DatasetOutcome>,
}

impl RunReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(DatasetOutcome::is_ok)
    }
}

/// Synchronize every dataset in order. One dataset's failure is logged,
/// recorded, and never aborts the rest of the run.
pub fn run(
    config: &SyncConfig,
    datasets: &[DatasetDescriptor],
    source: &dyn StatsSource,
    log: &mut RunLog,
) -> RunReport {
    let started_at = Local::now();
    log.info(&format!("Starting dataset sync ({})", config.mode_label()));
    log.info(&format!(
        "Year range: {}-{} (current: {})",
        config.start_year,
        config.end_year.max(config.current_year),
        config.current_year
    ));

    let mut outcomes = Vec::with_capacity(datasets.len());
    for ds in datasets {
        outcomes.push(sync_dataset(config, ds, source, log));
    }

    log.info("Update summary:");
    for outcome in &outcomes {
        let status = match outcome.status {
            DatasetStatus::Done => "SUCCESS".to_string(),
            DatasetStatus::Failed => format!(
                "FAILED ({})",
                outcome
                    .failed_step
                    .map(Step::as_str)
                    .unwrap_or("unknown step")
            ),
        };
        log.info(&format!("  {:12} {status}", outcome.dataset));
    }

    RunReport {
        started_at,
        finished_at: Local::now(),
        dry_run: config.dry_run,
        outcomes,
    }
}

fn sync_dataset(
    config: &SyncConfig,
    ds: &DatasetDescriptor,
    source: &dyn StatsSource,
    log: &mut RunLog,
) -> DatasetOutcome {
    let path = config.data_dir.join(ds.file_name);
    log.info(&format!("Updating {}...", ds.name));

    // SCANNING
    let inv = match inventory::existing_seasons(&path, ds.season_column) {
        Ok(inv) => inv,
        Err(err) => return failed(ds, Step::Scanning, &[], err, log),
    };
    if inv.malformed_rows > 0 {
        log.warn(&format!(
            "{}: skipped {} rows with unreadable season values",
            ds.name, inv.malformed_rows
        ));
    }
    let plan = plan_seasons(
        &inv.seasons,
        config.start_year,
        config.end_year,
        config.current_year,
        config.force_full,
    );
    log.info(&format!(
        "{}: {} seasons on disk, fetching {:?}",
        ds.name,
        inv.seasons.len(),
        plan.to_fetch
    ));
    if !plan.missing_historical.is_empty() {
        log.info(&format!(
            "{}: backfilling historical seasons {:?}",
            ds.name, plan.missing_historical
        ));
    }

    // FETCHING
    let batch = match fetch_seasons(source, ds, &plan.to_fetch) {
        Ok(batch) => batch,
        Err(err) => return failed(ds, Step::Fetching, &plan.to_fetch, err, log),
    };
    if batch.filter_column_missing
        && let Some(filter) = &ds.row_filter
    {
        log.warn(&format!(
            "{}: no {:?} column in payload; row filter skipped",
            ds.name, filter.column
        ));
    }
    if batch.rows_filtered_out > 0 {
        log.info(&format!(
            "{}: dropped {} rows below the activity threshold",
            ds.name, batch.rows_filtered_out
        ));
    }
    log.info(&format!(
        "{}: fetched {} rows",
        ds.name,
        batch.table.row_count()
    ));

    // MERGING
    let existing = match table::read_csv(&path) {
        Ok(table) => table,
        Err(err) => return failed(ds, Step::Merging, &plan.to_fetch, err, log),
    };
    let merged = match merge::merge(ds, &existing, &batch.table, config.current_year) {
        Ok(merged) => merged,
        Err(err) => return failed(ds, Step::Merging, &plan.to_fetch, err, log),
    };
    if merged.malformed_fetched_rows > 0 {
        log.warn(&format!(
            "{}: dropped {} fetched rows with unreadable season values",
            ds.name, merged.malformed_fetched_rows
        ));
    }

    // Nothing on disk and nothing fetched: there is no schema to persist yet.
    if merged.table.columns.is_empty() {
        log.info(&format!(
            "{}: no data on disk or upstream yet; nothing to write",
            ds.name
        ));
        return DatasetOutcome {
            dataset: ds.name,
            status: DatasetStatus::Done,
            seasons_fetched: plan.to_fetch,
            rows_before: 0,
            rows_after: 0,
            backup_path: None,
            failed_step: None,
            error: None,
        };
    }

    if config.dry_run {
        log.info(&format!(
            "{}: [DRY RUN] would write {} rows ({} before); current season {}: {} -> {} rows",
            ds.name,
            merged.rows_after,
            merged.rows_before,
            merged.current_season,
            merged.current_rows_before,
            merged.current_rows_after
        ));
        if !merged.historical_added.is_empty() {
            log.info(&format!(
                "{}: [DRY RUN] would add historical seasons {:?}",
                ds.name, merged.historical_added
            ));
        }
        return DatasetOutcome {
            dataset: ds.name,
            status: DatasetStatus::Done,
            seasons_fetched: plan.to_fetch,
            rows_before: merged.rows_before,
            rows_after: merged.rows_after,
            backup_path: None,
            failed_step: None,
            error: None,
        };
    }

    // BACKING_UP
    let backup = match backup::snapshot(&path) {
        Ok(backup) => backup,
        Err(err) => return failed(ds, Step::BackingUp, &plan.to_fetch, err, log),
    };
    if let Some(record) = &backup {
        log.info(&format!(
            "{}: backed up to {}",
            ds.name,
            record.backup_path.display()
        ));
    }

    // WRITING
    if let Err(err) = table::write_csv_atomic(&path, &merged.table) {
        return failed(ds, Step::Writing, &plan.to_fetch, err, log);
    }
    log.info(&format!(
        "{}: updated {} ({} rows, was {}; current season {} rows)",
        ds.name,
        ds.file_name,
        merged.rows_after,
        merged.rows_before,
        merged.current_rows_after
    ));

    DatasetOutcome {
        dataset: ds.name,
        status: DatasetStatus::Done,
        seasons_fetched: plan.to_fetch,
        rows_before: merged.rows_before,
        rows_after: merged.rows_after,
        backup_path: backup.map(|record| record.backup_path),
        failed_step: None,
        error: None,
    }
}

fn failed(
    ds: &DatasetDescriptor,
    step: Step,
    seasons: &[i32],
    err: anyhow::Error,
    log: &mut RunLog,
) -> DatasetOutcome {
    log.error(&format!(
        "{}: {} failed ({}): {err:#}",
        ds.name,
        step.as_str(),
        describe(&err)
    ));
    DatasetOutcome {
        dataset: ds.name,
        status: DatasetStatus::Failed,
        seasons_fetched: seasons.to_vec(),
        rows_before: 0,
        rows_after: 0,
        backup_path: None,
        failed_step: Some(step),
        error: Some(format!("{err:#}")),
    }
}

/// Classify a failure for the log: the taxonomy an operator triages by.
fn describe(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if cause.downcast_ref::<SchemaError>().is_some() {
            return "schema error";
        }
        if let Some(fetch) = cause.downcast_ref::<FetchError>() {
            return if fetch.is_retryable() {
                "retries exhausted"
            } else {
                "fatal fetch error"
            };
        }
    }
    "error"
}
