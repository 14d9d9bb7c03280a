use crate::table::RowTable;

/// Which upstream endpoint family a dataset is fed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Batting,
    Pitching,
    Rosters,
    Tracking,
}

/// Keep only rows whose numeric cell in `column` is at least `min`.
/// Unparsable cells count as zero, matching how the site's updater has always
/// treated blank stat cells.
#[derive(Debug, Clone, Copy)]
pub struct RowFilter {
    pub column: &'static str,
    pub min: f64,
}

impl RowFilter {
    /// Returns the number of rows dropped, or `None` when the filter column
    /// is absent from the table (filter skipped, caller may warn).
    pub fn retain(&self, table: &mut RowTable) -> Option<usize> {
        let idx = table.column_index(self.column)?;
        let before = table.rows.len();
        let min = self.min;
        table.rows.retain(|row| {
            let value = row
                .get(idx)
                .and_then(|cell| cell.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            value >= min
        });
        Some(before - table.rows.len())
    }
}

/// Immutable configuration of one managed dataset.
///
/// The season column is read from here, never assumed: the four files
/// genuinely disagree on its name ("Season" vs "season" vs "year").
#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    pub name: &'static str,
    pub file_name: &'static str,
    pub season_column: &'static str,
    /// Natural-key column for dedup within a season. Falls back to whole-row
    /// identity when the payload lacks it.
    pub entity_column: &'static str,
    pub source: SourceKind,
    pub row_filter: Option<RowFilter>,
}

pub const MIN_AT_BATS: f64 = 1.0;
pub const MIN_INNINGS_PITCHED: f64 = 1.0;

/// The managed datasets, in run order.
pub fn registry() -> Vec<DatasetDescriptor> {
    vec![
        DatasetDescriptor {
            name: "hitters",
            file_name: "fangraphs.csv",
            season_column: "Season",
            entity_column: "Name",
            source: SourceKind::Batting,
            row_filter: Some(RowFilter {
                column: "AB",
                min: MIN_AT_BATS,
            }),
        },
        DatasetDescriptor {
            name: "pitchers",
            file_name: "fangraphs_pitchers.csv",
            season_column: "Season",
            entity_column: "Name",
            source: SourceKind::Pitching,
            row_filter: Some(RowFilter {
                column: "IP",
                min: MIN_INNINGS_PITCHED,
            }),
        },
        DatasetDescriptor {
            name: "positions",
            file_name: "Positions.csv",
            season_column: "season",
            entity_column: "player_id",
            source: SourceKind::Rosters,
            row_filter: None,
        },
        DatasetDescriptor {
            name: "statcast",
            file_name: "statscast.csv",
            season_column: "year",
            entity_column: "player_id",
            source: SourceKind::Tracking,
            row_filter: None,
        },
    ]
}
