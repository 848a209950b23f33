//! Spreadsheet workbooks (xlsx, xlsm, xls, xlsb, ods) into record sets

use calamine::{Data, Reader, open_workbook_auto};
use chrono::NaiveTime;
use std::path::Path;

use super::RecordSet;
use super::delimited::from_grid;
use crate::errors::{AppResult, SourceError};

#[derive(Debug, Clone)]
pub struct WorkbookOptions {
    /// Sheet to read; the first sheet when unset
    pub sheet: Option<String>,
    pub skip_rows: usize,
    pub header_rows: usize,
    pub level_separator: String,
}

/// Read one sheet of a workbook.
///
/// Cells are rendered as text and go through the same header handling as
/// CSV files. Blank rows above the used range are kept so `skip_rows`
/// counts from the top of the sheet.
pub fn read_workbook(path: &Path, options: &WorkbookOptions) -> AppResult<RecordSet> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| SourceError::parse("workbook", e.to_string()))?;

    let names = workbook.sheet_names();
    let sheet = match &options.sheet {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted.as_str())
            .cloned()
            .ok_or_else(|| {
                SourceError::parse(
                    "workbook",
                    format!("no sheet '{wanted}' (sheets: {})", names.join(", ")),
                )
            })?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| SourceError::parse("workbook", "workbook has no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| SourceError::parse("workbook", format!("sheet '{sheet}': {e}")))?;

    let top = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let mut grid: Vec<Vec<String>> = vec![Vec::new(); top];
    grid.extend(range.rows().map(|row| row.iter().map(cell_text).collect()));

    from_grid(grid, options.skip_rows, options.header_rows, &options.level_separator)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time() == NaiveTime::MIN => ts.date().format("%Y-%m-%d").to_string(),
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
    }
}
