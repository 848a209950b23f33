//! Uploaded file handling
//!
//! A file source's upload directory holds `pending/`, `processed/` and
//! `failed/`. Files are picked up from `pending/` in name order and, once
//! every environment has run, renamed into `processed/` (all succeeded) or
//! `failed/` with their upload time prefixed as `YYYYMMDD_HHMMSS_`.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::pipeline::{PipelineRunner, RunOutcome};
use crate::sources::Source;

pub const PENDING_DIR: &str = "pending";
pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";

#[derive(Debug, Clone)]
pub struct UploadDirs {
    root: PathBuf,
    timezone: Tz,
}

impl UploadDirs {
    pub fn new(root: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            root: root.into(),
            timezone,
        }
    }

    pub fn pending(&self) -> PathBuf {
        self.root.join(PENDING_DIR)
    }

    pub fn processed(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    pub fn failed(&self) -> PathBuf {
        self.root.join(FAILED_DIR)
    }

    /// Regular files waiting in `pending/`, sorted by name
    pub async fn pending_files(&self) -> AppResult<Vec<PathBuf>> {
        let dir = self.pending();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if entry.file_type().await?.is_file() && !name.to_string_lossy().starts_with('.') {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Move `file` into `processed/` or `failed/`; returns the new path
    pub async fn settle(&self, file: &Path, success: bool) -> AppResult<PathBuf> {
        let name = file
            .file_name()
            .ok_or_else(|| AppError::validation(format!("{} is not a file", file.display())))?
            .to_string_lossy()
            .into_owned();
        let uploaded: DateTime<Utc> = tokio::fs::metadata(file).await?.modified()?.into();
        let prefix = uploaded
            .with_timezone(&self.timezone)
            .format("%Y%m%d_%H%M%S");

        let target_dir = if success { self.processed() } else { self.failed() };
        tokio::fs::create_dir_all(&target_dir).await?;
        let target = target_dir.join(format!("{prefix}_{name}"));
        tokio::fs::rename(file, &target).await?;
        info!("Moved {} to {}", file.display(), target.display());
        Ok(target)
    }
}

/// Result of running one uploaded file through every environment
#[derive(Debug)]
pub struct UploadRun {
    pub file: PathBuf,
    pub outcomes: Vec<(String, RunOutcome)>,
    /// Where the file ended up; `None` when the move failed
    pub moved_to: Option<PathBuf>,
}

impl UploadRun {
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.success)
    }
}

/// Run `file` against every environment, then move it exactly once
pub async fn run_upload(
    runner: &PipelineRunner,
    source: &Source,
    environments: &[String],
    dirs: &UploadDirs,
    file: &Path,
) -> UploadRun {
    let outcomes = runner.run_environments(source, environments, Some(file)).await;
    let success = !outcomes.is_empty() && outcomes.iter().all(|(_, o)| o.success);
    let moved_to = match dirs.settle(file, success).await {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Could not move {}: {}", file.display(), e);
            None
        }
    };
    UploadRun {
        file: file.to_path_buf(),
        outcomes,
        moved_to,
    }
}

/// Process every pending upload of `source`, oldest name first
pub async fn scan_source(
    runner: &PipelineRunner,
    source: &Source,
    environments: &[String],
    timezone: Tz,
) -> AppResult<Vec<UploadRun>> {
    let Some(root) = &source.uploads else {
        return Ok(Vec::new());
    };
    let dirs = UploadDirs::new(root, timezone);
    let files = dirs.pending_files().await?;
    if !files.is_empty() {
        info!("{} pending uploads for {}", files.len(), source.name);
    }
    let mut runs = Vec::with_capacity(files.len());
    for file in files {
        runs.push(run_upload(runner, source, environments, &dirs, &file).await);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs(root: &Path) -> UploadDirs {
        UploadDirs::new(root, chrono_tz::Asia::Kolkata)
    }

    #[tokio::test]
    async fn test_pending_files_sorted_and_filtered() {
        let root = tempfile::tempdir().unwrap();
        let dirs = dirs(root.path());
        assert!(dirs.pending_files().await.unwrap().is_empty());

        std::fs::create_dir_all(dirs.pending().join("nested")).unwrap();
        std::fs::write(dirs.pending().join("b.csv"), "x").unwrap();
        std::fs::write(dirs.pending().join("a.csv"), "x").unwrap();
        std::fs::write(dirs.pending().join(".partial"), "x").unwrap();

        let files = dirs.pending_files().await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn test_settle_prefixes_timestamp() {
        let root = tempfile::tempdir().unwrap();
        let dirs = dirs(root.path());
        std::fs::create_dir_all(dirs.pending()).unwrap();
        let ok = dirs.pending().join("crops.csv");
        let bad = dirs.pending().join("prices.csv");
        std::fs::write(&ok, "x").unwrap();
        std::fs::write(&bad, "x").unwrap();

        let moved = dirs.settle(&ok, true).await.unwrap();
        assert_eq!(moved.parent(), Some(dirs.processed().as_path()));
        let name = moved.file_name().unwrap().to_string_lossy().into_owned();
        // YYYYMMDD_HHMMSS_crops.csv
        assert_eq!(name.len(), "20240101_000000_crops.csv".len());
        assert!(name.ends_with("_crops.csv"));
        assert_eq!(name.as_bytes()[8], b'_');
        assert!(!ok.exists());

        let moved = dirs.settle(&bad, false).await.unwrap();
        assert_eq!(moved.parent(), Some(dirs.failed().as_path()));
    }

    #[tokio::test]
    async fn test_settle_missing_file_errors() {
        let root = tempfile::tempdir().unwrap();
        assert!(dirs(root.path()).settle(&root.path().join("gone.csv"), true).await.is_err());
    }
}
