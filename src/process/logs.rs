//! Per-run log files
//!
//! Every launch gets a `<timestamp>_<label>_stdout.log` / `_stderr.log` pair. Empty files
//! are swept away when the supervisor shuts down.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, error, info};

use crate::constants::{paths, process};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirectory {
    dir: PathBuf,
}

/// Open handles of one run's log pair
#[derive(Debug)]
pub struct RunLogs {
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub stdout: File,
    pub stderr: File,
}

impl LogDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_STATE_HOME/vinepress/logs`, falling back to the cache directory
    pub fn default_location() -> Self {
        let mut dir = dirs::state_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        dir.push(paths::APP_DIR);
        dir.push(paths::LOGS_DIR);
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory and opens a fresh stdout/stderr pair for `label`
    pub fn open_run_logs(&self, label: &str) -> Result<RunLogs> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create log directory {:?}", self.dir))?;

        let ts = Local::now().format(process::LOG_TIMESTAMP_FORMAT).to_string();
        let ext = process::LOG_EXTENSION;
        let stdout_path = self.dir.join(format!("{ts}_{label}_stdout.{ext}"));
        let stderr_path = self.dir.join(format!("{ts}_{label}_stderr.{ext}"));

        let stdout = open_log(&stdout_path)?;
        let stderr = open_log(&stderr_path)?;
        debug!(stdout = %stdout_path.display(), stderr = %stderr_path.display(), "Opened log files");

        Ok(RunLogs {
            stdout_path,
            stderr_path,
            stdout,
            stderr,
        })
    }

    pub fn remove_empty_logs(&self) -> usize {
        remove_empty_logs(&self.dir)
    }
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

/// Deletes zero-byte `*.log` files in `dir`; returns how many were removed
pub fn remove_empty_logs(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for path in entries.flatten().map(|e| e.path()) {
        let is_log = path.extension().and_then(|e| e.to_str()) == Some(process::LOG_EXTENSION);
        let is_empty = fs::metadata(&path).map(|m| m.is_file() && m.len() == 0).unwrap_or(false);
        if !(is_log && is_empty) {
            continue;
        }

        info!(path = %path.display(), "Removing empty log file");
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => error!(path = %path.display(), error = %e, "Failed to remove empty log file"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_run_logs_are_named_by_label() {
        let dir = TempDir::new().unwrap();
        let logs = LogDirectory::new(dir.path().join("logs"));

        let run = logs.open_run_logs("winecfg").unwrap();
        let name = run.stdout_path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.ends_with("_winecfg_stdout.log"), "{name}");
        assert!(run.stderr_path.exists());
    }

    #[test]
    fn test_remove_empty_logs_keeps_content() {
        let dir = TempDir::new().unwrap();
        let logs = LogDirectory::new(dir.path());

        let mut run = logs.open_run_logs("regedit").unwrap();
        writeln!(run.stdout, "hello").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        assert_eq!(logs.remove_empty_logs(), 1);
        assert!(run.stdout_path.exists());
        assert!(!run.stderr_path.exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_remove_empty_logs_missing_dir() {
        assert_eq!(remove_empty_logs(Path::new("/nonexistent/logs")), 0);
    }
}
