//! Tabular record sets passed between pipeline stages
//!
//! A [`RecordSet`] is an ordered list of rows over an ordered list of named
//! columns. Every row has exactly one value per column; column order is
//! insertion order and is what the staging loader writes.

use std::collections::HashSet;
use thiserror::Error;

pub mod delimited;
pub mod json;
pub mod reshape;
pub mod value;
pub mod workbook;

pub use value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("row has {found} values but the record set has {expected} columns")]
    RowWidth { expected: usize, found: usize },

    #[error("{0}")]
    Invalid(String),
}

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    /// Raw header rows of a multi-row header file, one entry per level
    header_levels: Vec<Vec<String>>,
}

impl RecordSet {
    pub fn new<I, S>(columns: I) -> DatasetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for column in columns {
            set.push_column(column.into())?;
        }
        Ok(set)
    }

    /// Build from columns and rows in one go, checking row widths
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> DatasetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new(columns)?;
        for row in rows {
            set.push_row(row)?;
        }
        Ok(set)
    }

    fn push_column(&mut self, name: String) -> DatasetResult<()> {
        if self.columns.iter().any(|c| *c == name) {
            return Err(DatasetError::DuplicateColumn(name));
        }
        self.columns.push(name);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn header_levels(&self) -> &[Vec<String>] {
        &self.header_levels
    }

    pub fn set_header_levels(&mut self, levels: Vec<Vec<String>>) {
        self.header_levels = levels;
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn require_column(&self, name: &str) -> DatasetResult<usize> {
        self.column_index(name)
            .ok_or_else(|| DatasetError::UnknownColumn(name.to_string()))
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> DatasetResult<()> {
        if row.len() != self.columns.len() {
            return Err(DatasetError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    pub fn set(&mut self, row: usize, column: &str, value: Value) -> DatasetResult<()> {
        let idx = self.require_column(column)?;
        let target = self
            .rows
            .get_mut(row)
            .ok_or_else(|| DatasetError::Invalid(format!("row {row} out of range")))?;
        target[idx] = value;
        Ok(())
    }

    /// Values of one column, top to bottom
    pub fn column_values(&self, name: &str) -> DatasetResult<impl Iterator<Item = &Value> + '_> {
        let idx = self.require_column(name)?;
        Ok(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Add a column filled with `value`, or overwrite it if it already exists
    pub fn add_column(&mut self, name: &str, value: Value) {
        self.add_column_with(name, |_, _| value.clone());
    }

    /// Add (or overwrite) a column computed from each row
    pub fn add_column_with<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&[String], &[Value]) -> Value,
    {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = f(&self.columns, row);
                }
            }
            None => {
                for row in &mut self.rows {
                    let v = f(&self.columns, row);
                    row.push(v);
                }
                self.columns.push(name.to_string());
            }
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> DatasetResult<()> {
        let idx = self.require_column(from)?;
        if from != to && self.has_column(to) {
            return Err(DatasetError::DuplicateColumn(to.to_string()));
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Rename every column through `f`; fails if two columns collapse to the same name
    pub fn rename_all<F>(&mut self, mut f: F) -> DatasetResult<()>
    where
        F: FnMut(&str) -> String,
    {
        let renamed: Vec<String> = self.columns.iter().map(|c| f(c)).collect();
        let mut seen = HashSet::new();
        for name in &renamed {
            if !seen.insert(name.as_str()) {
                return Err(DatasetError::DuplicateColumn(name.clone()));
            }
        }
        self.columns = renamed;
        Ok(())
    }

    /// Drop the named columns; unknown names are ignored
    pub fn drop_columns(&mut self, names: &[String]) {
        let keep: Vec<bool> = self.columns.iter().map(|c| !names.contains(c)).collect();
        if keep.iter().all(|k| *k) {
            return;
        }
        self.columns = retain_by_mask(std::mem::take(&mut self.columns), &keep);
        for row in &mut self.rows {
            *row = retain_by_mask(std::mem::take(row), &keep);
        }
    }

    pub fn null_count(&self, column: &str) -> DatasetResult<usize> {
        Ok(self.column_values(column)?.filter(|v| v.is_null()).count())
    }

    pub fn retain_rows<F>(&mut self, mut f: F)
    where
        F: FnMut(&[String], &[Value]) -> bool,
    {
        let columns = &self.columns;
        self.rows.retain(|row| f(columns, row));
    }

    /// Map every cell in place
    pub fn map_values<F>(&mut self, mut f: F)
    where
        F: FnMut(&Value) -> Option<Value>,
    {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if let Some(v) = f(cell) {
                    *cell = v;
                }
            }
        }
    }

    /// Replace nulls in a column with the last non-null value above them
    pub fn forward_fill(&mut self, column: &str) -> DatasetResult<()> {
        let idx = self.require_column(column)?;
        let mut last: Option<Value> = None;
        for row in &mut self.rows {
            if row[idx].is_null() {
                if let Some(prev) = &last {
                    row[idx] = prev.clone();
                }
            } else {
                last = Some(row[idx].clone());
            }
        }
        Ok(())
    }

    /// Append the rows of `other`, aligning by column name.
    ///
    /// Columns missing on either side are added and filled with nulls.
    pub fn concat(&mut self, other: RecordSet) {
        for column in other.columns() {
            if !self.has_column(column) {
                self.add_column(column, Value::Null);
            }
        }
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        for row in other.rows {
            let aligned = mapping
                .iter()
                .map(|m| m.map(|i| row[i].clone()).unwrap_or(Value::Null))
                .collect();
            self.rows.push(aligned);
        }
        if self.header_levels.is_empty() {
            self.header_levels = other.header_levels;
        }
    }
}

fn retain_by_mask<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, k)| k.then_some(item))
        .collect()
}
