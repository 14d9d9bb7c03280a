use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

/// A point-in-time copy of a dataset file. The engine never deletes these;
/// retention is an operator concern.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub source: PathBuf,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Local>,
}

/// Copy the file to a timestamped sibling before any overwrite. Returns
/// `None` when the source does not exist yet (first-ever run); any IO failure
/// is fatal for the caller's write step, since new data must never land
/// without a safety copy of the old state.
pub fn snapshot(path: &Path) -> Result<Option<BackupRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let created_at = Local::now();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("unusable dataset path {}", path.display()))?;
    let backup_path = path.with_file_name(format!(
        "{file_name}.backup_{}",
        created_at.format("%Y%m%d_%H%M%S")
    ));
    fs::copy(path, &backup_path).with_context(|| {
        format!(
            "back up {} to {}",
            path.display(),
            backup_path.display()
        )
    })?;
    Ok(Some(BackupRecord {
        source: path.to_path_buf(),
        backup_path,
        created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_to_timestamped_sibling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fangraphs.csv");
        fs::write(&path, "Season,Name\n2023,A\n").expect("write");

        let record = snapshot(&path).expect("snapshot").expect("record");
        assert!(record.backup_path.exists());
        let name = record
            .backup_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("fangraphs.csv.backup_"), "{name}");
        assert_eq!(
            fs::read_to_string(&record.backup_path).expect("read backup"),
            "Season,Name\n2023,A\n"
        );
    }

    #[test]
    fn snapshot_of_missing_file_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = snapshot(&dir.path().join("absent.csv")).expect("snapshot");
        assert!(record.is_none());
    }
}
