use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};

use crate::table::{self, parse_season};

/// Seasons currently persisted for one dataset, derived from the file on each
/// run, never stored.
#[derive(Debug, Clone, Default)]
pub struct SeasonInventory {
    pub seasons: BTreeSet<i32>,
    /// Rows whose season cell would not coerce to an integer. Skipped with a
    /// warning, never fatal.
    pub malformed_rows: usize,
}

/// Scan the dataset file for the seasons it already holds.
///
/// A missing or empty file is an empty inventory. A non-empty file without
/// the configured season column is a `SchemaError`.
pub fn existing_seasons(path: &Path, season_column: &str) -> Result<SeasonInventory> {
    let table =
        table::read_csv(path).with_context(|| format!("scan {}", path.display()))?;
    if table.columns.is_empty() {
        return Ok(SeasonInventory::default());
    }
    let idx = table.require_column(season_column)?;

    let mut seasons = BTreeSet::new();
    let mut malformed_rows = 0usize;
    for row in &table.rows {
        match row.get(idx).and_then(|cell| parse_season(cell)) {
            Some(season) => {
                seasons.insert(season);
            }
            None => malformed_rows += 1,
        }
    }
    Ok(SeasonInventory {
        seasons,
        malformed_rows,
    })
}

/// The seasons one run will request for a dataset.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    /// Sorted ascending; always contains the current season.
    pub to_fetch: Vec<i32>,
    pub missing_historical: BTreeSet<i32>,
    pub current_already_present: bool,
}

/// Missing historical seasons are fetched once; the current season is fetched
/// every run. `force_full` ignores the inventory and replans the whole range.
pub fn plan_seasons(
    existing: &BTreeSet<i32>,
    start_year: i32,
    end_year: i32,
    current_year: i32,
    force_full: bool,
) -> FetchPlan {
    let last = end_year.max(current_year);
    let all: BTreeSet<i32> = (start_year..=last).collect();

    if force_full {
        return FetchPlan {
            to_fetch: all.into_iter().collect(),
            missing_historical: BTreeSet::new(),
            current_already_present: existing.contains(&current_year),
        };
    }

    let missing_historical: BTreeSet<i32> = all
        .difference(existing)
        .copied()
        .filter(|s| *s != current_year)
        .collect();
    let mut to_fetch: BTreeSet<i32> = missing_historical.clone();
    to_fetch.insert(current_year);

    FetchPlan {
        to_fetch: to_fetch.into_iter().collect(),
        missing_historical,
        current_already_present: existing.contains(&current_year),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn seasons(values: &[i32]) -> BTreeSet<i32> {
        values.iter().copied().collect()
    }

    #[test]
    fn plan_requests_only_gaps_and_current() {
        let existing = seasons(&[2017, 2018, 2020, 2024]);
        let plan = plan_seasons(&existing, 2017, 2025, 2025, false);
        assert_eq!(plan.to_fetch, vec![2019, 2021, 2022, 2023, 2025]);
        assert_eq!(
            plan.missing_historical,
            seasons(&[2019, 2021, 2022, 2023])
        );
        assert!(!plan.current_already_present);
    }

    #[test]
    fn plan_with_full_history_still_refreshes_current() {
        let existing = seasons(&[2017, 2018, 2019, 2020]);
        let plan = plan_seasons(&existing, 2017, 2020, 2020, false);
        assert_eq!(plan.to_fetch, vec![2020]);
        assert!(plan.missing_historical.is_empty());
        assert!(plan.current_already_present);
    }

    #[test]
    fn plan_empty_inventory_requests_everything() {
        let plan = plan_seasons(&BTreeSet::new(), 2017, 2019, 2019, false);
        assert_eq!(plan.to_fetch, vec![2017, 2018, 2019]);
    }

    #[test]
    fn force_full_ignores_inventory() {
        let existing = seasons(&[2017, 2018, 2019]);
        let plan = plan_seasons(&existing, 2017, 2019, 2019, true);
        assert_eq!(plan.to_fetch, vec![2017, 2018, 2019]);
        assert!(plan.missing_historical.is_empty());
    }

    #[test]
    fn simulated_future_season_extends_the_range() {
        let existing = seasons(&[2017, 2018]);
        let plan = plan_seasons(&existing, 2017, 2018, 2019, false);
        assert_eq!(plan.to_fetch, vec![2019]);
    }

    #[test]
    fn scan_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = existing_seasons(&dir.path().join("absent.csv"), "Season").expect("scan");
        assert!(inv.seasons.is_empty());
        assert_eq!(inv.malformed_rows, 0);
    }

    #[test]
    fn scan_skips_malformed_seasons() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.csv");
        fs::write(&path, "Season,Name\n2023,A\noops,B\n2024.0,C\n").expect("write");
        let inv = existing_seasons(&path, "Season").expect("scan");
        assert_eq!(inv.seasons, seasons(&[2023, 2024]));
        assert_eq!(inv.malformed_rows, 1);
    }

    #[test]
    fn scan_without_season_column_is_schema_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.csv");
        fs::write(&path, "year,Name\n2023,A\n").expect("write");
        let err = existing_seasons(&path, "Season").unwrap_err();
        assert!(
            err.downcast_ref::<crate::table::SchemaError>().is_some(),
            "expected SchemaError, got {err:?}"
        );
    }
}
