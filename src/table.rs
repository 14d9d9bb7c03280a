use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Column layout problem (missing season column, drifted header). Fatal for
/// the affected dataset and never retried.
#[derive(Debug, Clone)]
pub struct SchemaError(pub String);

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema error: {}", self.0)
    }
}

impl std::error::Error for SchemaError {}

/// Ordered tabular records: one header, one `Vec<String>` per row, cells
/// aligned with `columns`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RowTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            SchemaError(format!(
                "column {name:?} not found in header {:?}",
                self.columns
            ))
            .into()
        })
    }

    /// Append a row, padding or truncating to the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }
}

/// Coerce a season cell to an integer season. Accepts plain integers and
/// integral floats ("2024", "2024.0"); anything else is malformed.
pub fn parse_season(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(n) = trimmed.parse::<i32>() {
        return Some(n);
    }
    let f = trimmed.parse::<f64>().ok()?;
    if f.fract() != 0.0 || !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&f) {
        return None;
    }
    Some(f as i32)
}

/// Read a dataset file. A missing or zero-byte file is an empty table, not an
/// error.
pub fn read_csv(path: &Path) -> Result<RowTable> {
    if !path.exists() {
        return Ok(RowTable::default());
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let columns = reader
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    if columns.is_empty() || (columns.len() == 1 && columns[0].is_empty()) {
        return Ok(RowTable::default());
    }

    let mut table = RowTable::new(columns);
    for record in reader.records() {
        let record = record.with_context(|| format!("read row of {}", path.display()))?;
        table.push_row(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(table)
}

/// Write the table to a temporary sibling and swap it into place, so an
/// interrupted run never leaves a half-written dataset.
pub fn write_csv_atomic(path: &Path, table: &RowTable) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("open {}", tmp.display()))?;
        writer
            .write_record(&table.columns)
            .context("write header")?;
        for row in &table.rows {
            writer.write_record(row).context("write row")?;
        }
        writer.flush().context("flush csv")?;
    }
    fs::rename(&tmp, path).with_context(|| format!("swap {}", path.display()))?;
    Ok(())
}
