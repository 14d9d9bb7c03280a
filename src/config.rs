use std::path::{Path, PathBuf};

use chrono::{Datelike, Local};

pub const DEFAULT_START_YEAR: i32 = 2017;

/// One run's resolved settings. The current season is decided here, once;
/// nothing downstream reads the clock, so reconciliation stays deterministic
/// and simulation is just a different number in this struct.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub log_path: PathBuf,
    pub start_year: i32,
    /// Last season of the managed range (this year, in production).
    pub end_year: i32,
    /// The live season. Equals `end_year` unless `--simulate-year` overrode it.
    pub current_year: i32,
    pub simulate_year: Option<i32>,
    pub dry_run: bool,
    pub force_full: bool,
    pub test_mode: bool,
}

impl SyncConfig {
    pub fn build(
        root: &Path,
        dry_run: bool,
        test_mode: bool,
        simulate_year: Option<i32>,
        force_full: bool,
        data_dir_override: Option<PathBuf>,
    ) -> Self {
        let this_year = Local::now().year();
        let data_dir = data_dir_override.unwrap_or_else(|| {
            root.join(if test_mode { "test_data" } else { "data" })
        });
        let log_path = if test_mode {
            data_dir.join("data_update.log")
        } else {
            root.join("logs").join("data_update.log")
        };
        Self {
            data_dir,
            log_path,
            start_year: env_i32("SYNC_START_YEAR", DEFAULT_START_YEAR),
            end_year: this_year,
            current_year: simulate_year.unwrap_or(this_year),
            simulate_year,
            dry_run,
            force_full,
            test_mode,
        }
    }

    /// Prefix stamped onto every log line so a test or simulated run is
    /// unmistakable in the shared log.
    pub fn mode_prefix(&self) -> String {
        let mut prefix = String::new();
        if self.test_mode {
            prefix.push_str("[TEST MODE] ");
        }
        if let Some(year) = self.simulate_year {
            prefix.push_str(&format!("[SIMULATE {year}] "));
        }
        prefix
    }

    pub fn mode_label(&self) -> String {
        let mut parts = Vec::new();
        if self.test_mode {
            parts.push("TEST MODE".to_string());
        }
        if self.dry_run {
            parts.push("DRY RUN".to_string());
        }
        if let Some(year) = self.simulate_year {
            parts.push(format!("SIMULATE {year}"));
        }
        if self.force_full {
            parts.push("FULL REBUILD".to_string());
        }
        if parts.is_empty() {
            return "PRODUCTION".to_string();
        }
        parts.join(" | ")
    }
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_overrides_current_but_not_end_year() {
        let config = SyncConfig::build(Path::new("/tmp/x"), false, false, Some(2031), false, None);
        assert_eq!(config.current_year, 2031);
        assert_eq!(config.end_year, Local::now().year());
        assert_eq!(config.mode_prefix(), "[SIMULATE 2031] ");
    }

    #[test]
    fn test_mode_redirects_files_and_log() {
        let config = SyncConfig::build(Path::new("/srv/app"), true, true, None, false, None);
        assert!(config.data_dir.ends_with("test_data"));
        assert!(config.log_path.starts_with(&config.data_dir));
        assert_eq!(config.mode_label(), "TEST MODE | DRY RUN");
    }

    #[test]
    fn production_label_and_paths() {
        let config = SyncConfig::build(Path::new("/srv/app"), false, false, None, false, None);
        assert_eq!(config.mode_label(), "PRODUCTION");
        assert!(config.data_dir.ends_with("data"));
        assert!(config.log_path.ends_with("logs/data_update.log"));
        assert_eq!(config.mode_prefix(), "");
    }
}
