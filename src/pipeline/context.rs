use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use super::RunLog;
use crate::database::Database;
use crate::transform::ReferenceData;

/// One independently committed slice of a run: a date, a month, an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub label: String,
    pub date: Option<NaiveDate>,
    pub file: Option<PathBuf>,
}

impl WorkUnit {
    pub fn for_date(label: String, date: NaiveDate) -> Self {
        Self {
            label,
            date: Some(date),
            file: None,
        }
    }

    pub fn for_file(path: &Path, run_date: NaiveDate) -> Self {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            label,
            date: Some(run_date),
            file: Some(path.to_path_buf()),
        }
    }
}

/// Everything a stage may touch during one environment invocation
pub struct RunContext<'a> {
    pub source: &'a str,
    pub environment: &'a str,
    pub run_date: NaiveDate,
    pub db: &'a Database,
    pub log: &'a RunLog,
    pub reference: &'a dyn ReferenceData,
}
