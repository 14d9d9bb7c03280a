use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

/// Append-only run log, mirrored to stderr for whoever tails the scheduler
/// output. Operators read it; the engine never parses it back.
pub struct RunLog {
    file: File,
    prefix: String,
}

impl RunLog {
    /// `prefix` is prepended to every message, e.g. `[TEST MODE] ` or
    /// `[SIMULATE 2026] `.
    pub fn open(path: &Path, prefix: String) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("create log dir {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log {}", path.display()))?;
        Ok(Self { file, prefix })
    }

    pub fn info(&mut self, msg: &str) {
        self.write("INFO", msg);
    }

    pub fn warn(&mut self, msg: &str) {
        self.write("WARNING", msg);
    }

    pub fn error(&mut self, msg: &str) {
        self.write("ERROR", msg);
    }

    fn write(&mut self, level: &str, msg: &str) {
        let line = format!(
            "{} - {level} - {}{msg}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.prefix
        );
        eprintln!("{line}");
        // A full disk must not take the sync down with it.
        let _ = writeln!(self.file, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_level_and_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let mut log = RunLog::open(&path, "[TEST MODE] ".to_string()).expect("open");
        log.info("hello");
        log.error("boom");
        drop(log);

        let raw = fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" - INFO - [TEST MODE] hello"));
        assert!(lines[1].contains(" - ERROR - [TEST MODE] boom"));
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        RunLog::open(&path, String::new()).expect("open").info("one");
        RunLog::open(&path, String::new()).expect("open").info("two");
        let raw = fs::read_to_string(&path).expect("read log");
        assert_eq!(raw.lines().count(), 2);
    }
}
