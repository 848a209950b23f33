use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;

use super::{FailureKind, StageError};

/// Immutable record of one environment invocation, written to the audit table
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub job_name: String,
    pub environment: String,
    pub run_date: NaiveDate,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub success: bool,
    pub log_text: String,
}

impl RunRecord {
    pub fn status_label(&self) -> &'static str {
        if self.success { "Success" } else { "Fail" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Loaded { units: usize, rows: u64 },
    NoNewData,
    Failed {
        #[serde(serialize_with = "serialize_kind")]
        kind: FailureKind,
        unit: Option<String>,
    },
}

fn serialize_kind<S: serde::Serializer>(kind: &FailureKind, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(kind)
}

/// What the caller of a run gets back; failures never escape as errors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub status: RunStatus,
    pub message: String,
}

impl RunOutcome {
    pub fn loaded(units: usize, rows: u64) -> Self {
        Self {
            success: true,
            status: RunStatus::Loaded { units, rows },
            message: format!("Loaded {rows} rows across {units} units"),
        }
    }

    pub fn no_new_data<S: Into<String>>(message: S) -> Self {
        Self {
            success: true,
            status: RunStatus::NoNewData,
            message: message.into(),
        }
    }

    pub fn failed(error: &StageError, unit: Option<String>) -> Self {
        Self {
            success: false,
            status: RunStatus::Failed {
                kind: error.kind,
                unit,
            },
            message: error.to_string(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.status {
            RunStatus::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
