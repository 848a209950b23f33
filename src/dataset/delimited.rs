//! Delimited text (CSV) reading with multi-row headers

use encoding_rs::Encoding;
use std::io::Read;

use super::{DatasetResult, RecordSet, Value};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Lines to discard before the header rows
    pub skip_rows: usize,
    /// Number of header rows; at least one
    pub header_rows: usize,
    /// Joins header levels into a single column name
    pub level_separator: String,
    pub encoding: &'static Encoding,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_rows: 0,
            header_rows: 1,
            level_separator: crate::config::DEFAULT_HEADER_SEPARATOR.to_string(),
            encoding: encoding_rs::UTF_8,
        }
    }
}

/// Resolve an encoding label such as `utf-8`, `cp1252` or `windows-1252`
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Read a CSV document into a record set.
///
/// The input is decoded with `options.encoding` (a byte order mark wins);
/// bytes that are malformed in that encoding fail the read instead of being
/// replaced. Header handling is shared with workbook sheets.
pub fn read_csv<R: Read>(mut reader: R, options: &CsvOptions) -> AppResult<RecordSet> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let (text, used, malformed) = options.encoding.decode(&bytes);
    if malformed {
        return Err(AppError::validation(format!(
            "input is not valid {}; set the file encoding (e.g. cp1252)",
            used.name()
        )));
    }

    let mut csv_reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(options.delimiter)
        .from_reader(text.as_bytes());

    let mut grid: Vec<Vec<String>> = Vec::new();
    for record in csv_reader.records() {
        grid.push(record?.iter().map(str::to_string).collect());
    }
    from_grid(grid, options.skip_rows, options.header_rows, &options.level_separator)
}

/// Build a record set from raw rows of cells.
///
/// The first `skip_rows` rows are discarded and the next `header_rows` form
/// the header levels. Header cells are trimmed and spreadsheet placeholders
/// (`Unnamed: 3`) count as blank. All levels but the last are forward-filled
/// left to right, so a merged `Kharif` cell spanning `Area` and `Yield` yields
/// `Kharif|Area` and `Kharif|Yield`. Fully blank data rows are skipped.
pub(crate) fn from_grid(
    grid: Vec<Vec<String>>,
    skip_rows: usize,
    header_rows: usize,
    separator: &str,
) -> AppResult<RecordSet> {
    let header_rows = header_rows.max(1);
    let mut levels: Vec<Vec<String>> = Vec::with_capacity(header_rows);
    let mut data: Vec<Vec<String>> = Vec::new();

    for cells in grid.into_iter().skip(skip_rows) {
        if levels.len() < header_rows {
            levels.push(cells);
        } else if cells.iter().any(|c| !c.trim().is_empty()) {
            data.push(cells);
        }
    }

    if levels.is_empty() {
        return Ok(RecordSet::default());
    }

    let width = levels
        .iter()
        .chain(data.iter())
        .map(Vec::len)
        .max()
        .unwrap_or(0);
    let levels = normalize_header_levels(levels, width);
    let columns = column_names(&levels, separator);

    let mut set = build(columns, data, width)
        .map_err(|e| AppError::validation(format!("header problem: {e}")))?;
    set.set_header_levels(levels);
    Ok(set)
}

fn build(columns: Vec<String>, data: Vec<Vec<String>>, width: usize) -> DatasetResult<RecordSet> {
    let mut set = RecordSet::new(columns)?;
    for mut cells in data {
        cells.resize(width, String::new());
        set.push_row(cells.iter().map(|c| Value::infer(c)).collect())?;
    }
    Ok(set)
}

fn normalize_header_levels(levels: Vec<Vec<String>>, width: usize) -> Vec<Vec<String>> {
    let last = levels.len().saturating_sub(1);
    levels
        .into_iter()
        .enumerate()
        .map(|(depth, mut row)| {
            row.resize(width, String::new());
            let mut previous = String::new();
            row.into_iter()
                .map(|cell| {
                    let cell = clean_header_cell(&cell);
                    if depth < last {
                        if cell.is_empty() {
                            return previous.clone();
                        }
                        previous = cell.clone();
                    }
                    cell
                })
                .collect()
        })
        .collect()
}

fn clean_header_cell(cell: &str) -> String {
    let trimmed = cell.trim();
    if trimmed.starts_with("Unnamed") {
        String::new()
    } else {
        trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Join the non-empty levels of each column; disambiguate repeats with `.1`, `.2`
pub(crate) fn column_names(levels: &[Vec<String>], separator: &str) -> Vec<String> {
    let width = levels.first().map(Vec::len).unwrap_or(0);
    let mut names: Vec<String> = Vec::with_capacity(width);
    for col in 0..width {
        let parts: Vec<&str> = levels
            .iter()
            .map(|level| level[col].as_str())
            .filter(|p| !p.is_empty())
            .collect();
        let base = if parts.is_empty() {
            format!("column_{}", col + 1)
        } else {
            parts.join(separator)
        };
        let mut name = base.clone();
        let mut n = 1;
        while names.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        names.push(name);
    }
    names
}
