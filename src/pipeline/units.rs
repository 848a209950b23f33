//! Unit-of-work planning
//!
//! Date-driven sources resume from the staging table's watermark: every
//! day (or month) after the last loaded one, up to today minus a lag. Units
//! are returned in ascending order and an empty plan means nothing is due.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{StageError, WorkUnit};
use crate::utils::time::{Granularity, first_of_month};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitPlan {
    /// One unit for the run date
    #[default]
    Single,
    Daily {
        watermark_column: String,
        /// Days behind today that are still unpublished (default 1)
        #[serde(default)]
        lag: Option<u32>,
        /// First date to load while the staging table is empty
        #[serde(default)]
        start_date: Option<NaiveDate>,
    },
    Monthly {
        watermark_column: String,
        /// Months behind the current one that are still unpublished (default 1)
        #[serde(default)]
        lag: Option<u32>,
        #[serde(default)]
        start_date: Option<NaiveDate>,
    },
    /// One unit for an uploaded file
    File,
}

const DEFAULT_LAG: u32 = 1;

impl UnitPlan {
    pub fn watermark_column(&self) -> Option<&str> {
        match self {
            Self::Daily {
                watermark_column, ..
            }
            | Self::Monthly {
                watermark_column, ..
            } => Some(watermark_column),
            _ => None,
        }
    }

    /// Units due on `today`, given the last loaded date
    pub fn plan(
        &self,
        watermark: Option<NaiveDate>,
        today: NaiveDate,
        file: Option<&Path>,
    ) -> Result<Vec<WorkUnit>, StageError> {
        match self {
            Self::Single => Ok(vec![WorkUnit::for_date(
                today.format("%Y-%m-%d").to_string(),
                today,
            )]),
            Self::File => {
                let file = file.ok_or_else(|| {
                    StageError::extraction("file-driven source run without an uploaded file")
                })?;
                Ok(vec![WorkUnit::for_file(file, today)])
            }
            Self::Daily {
                lag, start_date, ..
            } => {
                let from = resume_from(watermark, *start_date, Granularity::Daily)?;
                let to = today
                    .checked_sub_days(Days::new(u64::from(lag.unwrap_or(DEFAULT_LAG))))
                    .unwrap_or(NaiveDate::MIN);
                Ok(date_range(from, to, Granularity::Daily))
            }
            Self::Monthly {
                lag, start_date, ..
            } => {
                let from = resume_from(watermark, *start_date, Granularity::Monthly)?;
                let to = first_of_month(today)
                    .checked_sub_months(Months::new(lag.unwrap_or(DEFAULT_LAG)))
                    .unwrap_or(NaiveDate::MIN);
                Ok(date_range(from, to, Granularity::Monthly))
            }
        }
    }
}

fn resume_from(
    watermark: Option<NaiveDate>,
    start_date: Option<NaiveDate>,
    granularity: Granularity,
) -> Result<NaiveDate, StageError> {
    match (watermark, start_date) {
        (Some(last), _) => Ok(granularity.next(last)),
        (None, Some(start)) => Ok(granularity.align(start)),
        (None, None) => Err(StageError::extraction(
            "staging table is empty and no start_date is configured",
        )),
    }
}

fn date_range(from: NaiveDate, to: NaiveDate, granularity: Granularity) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        let label = match granularity {
            Granularity::Daily => cursor.format("%Y-%m-%d").to_string(),
            Granularity::Monthly => cursor.format("%Y-%m").to_string(),
        };
        units.push(WorkUnit::for_date(label, cursor));
        let next = granularity.next(cursor);
        if next <= cursor {
            break;
        }
        cursor = next;
    }
    units
}
