use std::collections::{BTreeSet, HashMap};

use anyhow::Result;

use crate::datasets::DatasetDescriptor;
use crate::table::{RowTable, SchemaError, parse_season};

/// Outcome of reconciling a fetched batch into the persisted table.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub table: RowTable,
    pub rows_before: usize,
    pub rows_after: usize,
    /// Seasons introduced by the fetch that were not on disk (backfilled gaps).
    pub historical_added: Vec<i32>,
    /// Historical seasons the fetch re-supplied; the newer rows won wholesale.
    pub historical_replaced: Vec<i32>,
    pub current_season: i32,
    pub current_rows_before: usize,
    pub current_rows_after: usize,
    /// Fetched rows dropped because their season cell would not parse.
    pub malformed_fetched_rows: usize,
}

/// Produce the next persisted table from the prior table plus a fetched batch.
///
/// Historical seasons are retained unless the fetch re-supplies them, in which
/// case the fetched rows replace that season wholesale. The current season is
/// always replaced, even by an empty fetch: the upstream current-season rows
/// are cumulative snapshots, and stale ones must be purged, not kept.
/// Seasons newer than the current one are treated as historical and preserved.
pub fn merge(
    ds: &DatasetDescriptor,
    existing: &RowTable,
    fetched: &RowTable,
    current_season: i32,
) -> Result<MergeResult> {
    let columns = resolve_columns(ds, existing, fetched)?;
    let fetched_rows = align_rows(&columns, fetched);

    let season_idx = columns.iter().position(|c| c == ds.season_column);
    let entity_idx = columns.iter().position(|c| c == ds.entity_column);

    // A header-only or absent file has no season column to consult; every
    // season then counts as missing and the fetch supplies the whole table.
    let season_of = |row: &[String]| -> Option<i32> {
        season_idx.and_then(|idx| row.get(idx).and_then(|cell| parse_season(cell)))
    };

    let mut fetched_seasons = BTreeSet::new();
    let mut deduped: Vec<Vec<String>> = Vec::with_capacity(fetched_rows.len());
    let mut by_key: HashMap<(i32, String), usize> = HashMap::new();
    let mut malformed_fetched_rows = 0usize;
    for row in fetched_rows {
        let Some(season) = season_of(&row) else {
            malformed_fetched_rows += 1;
            continue;
        };
        fetched_seasons.insert(season);
        let key = (season, entity_key(&row, entity_idx));
        match by_key.get(&key) {
            // Same natural key fetched twice: the later row wins. Documented
            // assumption, see DESIGN.md.
            Some(&slot) => deduped[slot] = row,
            None => {
                by_key.insert(key, deduped.len());
                deduped.push(row);
            }
        }
    }

    let mut existing_seasons = BTreeSet::new();
    let mut current_rows_before = 0usize;
    let mut kept: Vec<Vec<String>> = Vec::new();
    for row in &existing.rows {
        match season_of(row) {
            Some(season) => {
                existing_seasons.insert(season);
                if season == current_season {
                    current_rows_before += 1;
                    continue;
                }
                if fetched_seasons.contains(&season) {
                    continue;
                }
                kept.push(row.clone());
            }
            // Rows without a parseable season cannot be re-fetched; keep them
            // rather than lose data.
            None => kept.push(row.clone()),
        }
    }

    verify_disjoint_seasons(&kept, &fetched_seasons, season_of)?;

    let current_rows_after = deduped
        .iter()
        .filter(|row| season_of(row.as_slice()) == Some(current_season))
        .count();

    let mut rows = kept;
    rows.extend(deduped);
    rows.sort_by(|a, b| {
        let sa = season_of(a);
        let sb = season_of(b);
        sa.cmp(&sb)
            .then_with(|| entity_key(a, entity_idx).cmp(&entity_key(b, entity_idx)))
    });

    let historical_added = fetched_seasons
        .iter()
        .copied()
        .filter(|s| *s != current_season && !existing_seasons.contains(s))
        .collect();
    let historical_replaced = fetched_seasons
        .iter()
        .copied()
        .filter(|s| *s != current_season && existing_seasons.contains(s))
        .collect();

    let rows_before = existing.row_count();
    let rows_after = rows.len();
    Ok(MergeResult {
        table: RowTable { columns, rows },
        rows_before,
        rows_after,
        historical_added,
        historical_replaced,
        current_season,
        current_rows_before,
        current_rows_after,
        malformed_fetched_rows,
    })
}

/// Existing and fetched must agree on the column set. Order may differ (the
/// fetched side is rebuilt from payload keys); sets that differ are schema
/// drift and fatal.
fn resolve_columns(
    ds: &DatasetDescriptor,
    existing: &RowTable,
    fetched: &RowTable,
) -> Result<Vec<String>> {
    if existing.columns.is_empty() {
        return Ok(fetched.columns.clone());
    }
    if fetched.columns.is_empty() {
        return Ok(existing.columns.clone());
    }
    let a: BTreeSet<&String> = existing.columns.iter().collect();
    let b: BTreeSet<&String> = fetched.columns.iter().collect();
    if a != b {
        let missing: Vec<&&String> = a.difference(&b).collect();
        let extra: Vec<&&String> = b.difference(&a).collect();
        return Err(SchemaError(format!(
            "{}: fetched columns drifted from file (missing {missing:?}, extra {extra:?})",
            ds.name
        ))
        .into());
    }
    Ok(existing.columns.clone())
}

/// Reorder fetched rows into the resolved column order.
fn align_rows(columns: &[String], fetched: &RowTable) -> Vec<Vec<String>> {
    if fetched.columns.is_empty() || fetched.columns == columns {
        return fetched.rows.clone();
    }
    let mapping: Vec<usize> = columns
        .iter()
        .map(|c| {
            fetched
                .columns
                .iter()
                .position(|fc| fc == c)
                .expect("column sets verified equal")
        })
        .collect();
    fetched
        .rows
        .iter()
        .map(|row| {
            mapping
                .iter()
                .map(|&idx| row.get(idx).cloned().unwrap_or_default())
                .collect()
        })
        .collect()
}

fn entity_key(row: &[String], entity_idx: Option<usize>) -> String {
    match entity_idx.and_then(|idx| row.get(idx)) {
        Some(cell) => cell.clone(),
        // No identity column in this payload: whole-row identity.
        None => row.join("\u{1f}"),
    }
}

/// Season-level counting check: no season in the result may originate from
/// both the kept-historical bucket and the fetched bucket.
fn verify_disjoint_seasons(
    kept: &[Vec<String>],
    fetched_seasons: &BTreeSet<i32>,
    season_of: impl Fn(&[String]) -> Option<i32>,
) -> Result<()> {
    for row in kept {
        if let Some(season) = season_of(row)
            && fetched_seasons.contains(&season)
        {
            return Err(anyhow::anyhow!(
                "merge invariant violated: season {season} present in both buckets"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{DatasetDescriptor, SourceKind};

    fn descriptor() -> DatasetDescriptor {
        DatasetDescriptor {
            name: "hitters",
            file_name: "fangraphs.csv",
            season_column: "Season",
            entity_column: "Name",
            source: SourceKind::Batting,
            row_filter: None,
        }
    }

    fn table(rows: &[(&str, &str, &str)]) -> RowTable {
        let mut t = RowTable::new(vec![
            "Season".to_string(),
            "Name".to_string(),
            "HR".to_string(),
        ]);
        for (season, name, hr) in rows {
            t.push_row(vec![
                season.to_string(),
                name.to_string(),
                hr.to_string(),
            ]);
        }
        t
    }

    fn seasons_in(result: &MergeResult) -> Vec<i32> {
        let idx = result.table.column_index("Season").unwrap();
        let mut seasons: Vec<i32> = result
            .table
            .rows
            .iter()
            .filter_map(|r| parse_season(&r[idx]))
            .collect();
        seasons.dedup();
        seasons
    }

    #[test]
    fn historical_seasons_are_retained() {
        let existing = table(&[("2022", "A", "10"), ("2023", "B", "20")]);
        let fetched = table(&[("2024", "C", "5")]);
        let result = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        assert_eq!(seasons_in(&result), vec![2022, 2023, 2024]);
        assert_eq!(result.rows_before, 2);
        assert_eq!(result.rows_after, 3);
        assert!(result.historical_added.is_empty());
        assert!(result.historical_replaced.is_empty());
    }

    #[test]
    fn current_season_is_replaced_wholesale() {
        let existing = table(&[("2023", "A", "10"), ("2024", "B", "1"), ("2024", "C", "2")]);
        let fetched = table(&[("2024", "B", "3")]);
        let result = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        assert_eq!(result.current_rows_before, 2);
        assert_eq!(result.current_rows_after, 1);
        let names: Vec<&str> = result.table.rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(result.table.rows[1][2], "3");
    }

    #[test]
    fn empty_fetch_still_purges_stale_current_rows() {
        let existing = table(&[("2023", "A", "10"), ("2025", "B", "1")]);
        let fetched = RowTable::default();
        let result = merge(&descriptor(), &existing, &fetched, 2025).unwrap();
        assert_eq!(seasons_in(&result), vec![2023]);
        assert_eq!(result.current_rows_before, 1);
        assert_eq!(result.current_rows_after, 0);
    }

    #[test]
    fn corrective_refetch_replaces_the_season() {
        let existing = table(&[("2022", "A", "10"), ("2022", "B", "11"), ("2023", "C", "1")]);
        let fetched = table(&[("2022", "A", "99"), ("2023", "C", "2")]);
        let result = merge(&descriptor(), &existing, &fetched, 2023).unwrap();
        // 2022 came back corrected: the old two rows are gone, the new one wins.
        let rows_2022: Vec<&Vec<String>> = result
            .table
            .rows
            .iter()
            .filter(|r| r[0] == "2022")
            .collect();
        assert_eq!(rows_2022.len(), 1);
        assert_eq!(rows_2022[0][2], "99");
        assert_eq!(result.historical_replaced, vec![2022]);
    }

    #[test]
    fn merge_is_idempotent_for_identical_input() {
        let existing = table(&[("2023", "A", "10")]);
        let fetched = table(&[("2024", "B", "1"), ("2024", "C", "2")]);
        let once = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        let twice = merge(&descriptor(), &once.table, &fetched, 2024).unwrap();
        assert_eq!(once.table, twice.table);
    }

    #[test]
    fn duplicate_natural_keys_in_fetch_keep_the_later_row() {
        let existing = RowTable::default();
        let fetched = table(&[("2024", "A", "1"), ("2024", "A", "7")]);
        let result = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        assert_eq!(result.table.rows.len(), 1);
        assert_eq!(result.table.rows[0][2], "7");
    }

    #[test]
    fn future_dated_rows_survive_as_historical() {
        let existing = table(&[("2026", "A", "10"), ("2024", "B", "1")]);
        let fetched = table(&[("2024", "C", "2")]);
        let result = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        assert_eq!(seasons_in(&result), vec![2024, 2026]);
    }

    #[test]
    fn both_empty_is_a_noop_with_schema() {
        let existing = RowTable::new(vec!["Season".to_string(), "Name".to_string()]);
        let fetched = RowTable::default();
        let result = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        assert!(result.table.is_empty());
        assert_eq!(result.table.columns, existing.columns);
    }

    #[test]
    fn column_drift_is_a_schema_error() {
        let existing = table(&[("2023", "A", "10")]);
        let mut fetched = RowTable::new(vec![
            "Season".to_string(),
            "Name".to_string(),
            "OPS".to_string(),
        ]);
        fetched.push_row(vec!["2024".to_string(), "B".to_string(), ".900".to_string()]);
        let err = merge(&descriptor(), &existing, &fetched, 2024).unwrap_err();
        assert!(err.downcast_ref::<SchemaError>().is_some());
    }

    #[test]
    fn reordered_fetch_columns_align_to_the_file() {
        let existing = table(&[("2023", "A", "10")]);
        let mut fetched = RowTable::new(vec![
            "Name".to_string(),
            "HR".to_string(),
            "Season".to_string(),
        ]);
        fetched.push_row(vec!["B".to_string(), "4".to_string(), "2024".to_string()]);
        let result = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        assert_eq!(result.table.columns, existing.columns);
        assert_eq!(
            result.table.rows[1],
            vec!["2024".to_string(), "B".to_string(), "4".to_string()]
        );
    }

    #[test]
    fn malformed_fetched_rows_are_counted_and_dropped() {
        let existing = RowTable::default();
        let fetched = table(&[("oops", "A", "1"), ("2024", "B", "2")]);
        let result = merge(&descriptor(), &existing, &fetched, 2024).unwrap();
        assert_eq!(result.malformed_fetched_rows, 1);
        assert_eq!(result.table.rows.len(), 1);
    }
}
