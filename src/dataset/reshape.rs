//! Wide/long reshaping and date spine generation

use chrono::NaiveDate;

use super::{DatasetError, DatasetResult, RecordSet, Value};
use crate::utils::time::Granularity;

impl RecordSet {
    /// Unpivot `value_columns` into `(variable_column, value_column)` pairs.
    ///
    /// With an empty `value_columns`, every column that is not an id column is
    /// melted. Output rows are grouped by input row, preserving order.
    pub fn melt(
        &self,
        id_columns: &[String],
        value_columns: &[String],
        variable_column: &str,
        value_column: &str,
    ) -> DatasetResult<RecordSet> {
        let id_idx = id_columns
            .iter()
            .map(|c| {
                self.column_index(c)
                    .ok_or_else(|| DatasetError::UnknownColumn(c.clone()))
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        let melted: Vec<(usize, &String)> = if value_columns.is_empty() {
            self.columns()
                .iter()
                .enumerate()
                .filter(|(_, c)| !id_columns.contains(c))
                .collect()
        } else {
            value_columns
                .iter()
                .map(|c| {
                    self.column_index(c)
                        .map(|i| (i, c))
                        .ok_or_else(|| DatasetError::UnknownColumn(c.clone()))
                })
                .collect::<DatasetResult<Vec<_>>>()?
        };

        let mut columns: Vec<String> = id_columns.to_vec();
        columns.push(variable_column.to_string());
        columns.push(value_column.to_string());
        let mut out = RecordSet::new(columns)?;

        for row in self.rows() {
            for (idx, name) in &melted {
                let mut new_row: Vec<Value> = id_idx.iter().map(|i| row[*i].clone()).collect();
                new_row.push(Value::Text((*name).clone()));
                new_row.push(row[*idx].clone());
                out.push_row(new_row)?;
            }
        }
        Ok(out)
    }

    /// Move the outer level of `outer{sep}inner` column names into rows.
    ///
    /// Columns without the separator are id columns and are repeated on every
    /// output row. For each input row one output row is produced per distinct
    /// outer level (first-seen order), with one column per distinct inner
    /// name; combinations absent from the input are null.
    pub fn stack_header_level(&self, separator: &str, level_column: &str) -> DatasetResult<RecordSet> {
        if separator.is_empty() {
            return Err(DatasetError::Invalid("header separator must not be empty".to_string()));
        }

        let mut id_idx = Vec::new();
        let mut outers: Vec<String> = Vec::new();
        let mut inners: Vec<String> = Vec::new();
        let mut stacked: Vec<(usize, usize, usize)> = Vec::new();

        for (idx, name) in self.columns().iter().enumerate() {
            match name.split_once(separator) {
                Some((outer, inner)) => {
                    let o = position_or_push(&mut outers, outer);
                    let i = position_or_push(&mut inners, inner);
                    stacked.push((idx, o, i));
                }
                None => id_idx.push(idx),
            }
        }

        if stacked.is_empty() {
            return Err(DatasetError::Invalid(format!(
                "no column names contain the header separator '{separator}'"
            )));
        }

        let mut columns: Vec<String> = id_idx.iter().map(|i| self.columns()[*i].clone()).collect();
        columns.push(level_column.to_string());
        columns.extend(inners.iter().cloned());
        let mut out = RecordSet::new(columns)?;

        for row in self.rows() {
            for (o, outer) in outers.iter().enumerate() {
                let mut new_row: Vec<Value> = id_idx.iter().map(|i| row[*i].clone()).collect();
                new_row.push(Value::Text(outer.clone()));
                let mut cells = vec![Value::Null; inners.len()];
                for (idx, so, si) in &stacked {
                    if *so == o {
                        cells[*si] = row[*idx].clone();
                    }
                }
                new_row.extend(cells);
                out.push_row(new_row)?;
            }
        }
        Ok(out)
    }

    /// Fill gaps in a date column with a generated spine.
    ///
    /// Rows are sorted by `date_column`; every missing date (or month start)
    /// between the first date and `through` (or the last date) gets a row
    /// copying the previous row's values. Rows with a null date are dropped.
    pub fn fill_date_spine(
        &self,
        date_column: &str,
        granularity: Granularity,
        through: Option<NaiveDate>,
    ) -> DatasetResult<RecordSet> {
        let idx = self
            .column_index(date_column)
            .ok_or_else(|| DatasetError::UnknownColumn(date_column.to_string()))?;

        let mut dated: Vec<(NaiveDate, &Vec<Value>)> = Vec::with_capacity(self.len());
        for row in self.rows() {
            match &row[idx] {
                Value::Null => continue,
                v => {
                    let d = v.as_date().ok_or_else(|| {
                        DatasetError::Invalid(format!(
                            "column '{date_column}' holds a {} value, expected a date",
                            v.type_name()
                        ))
                    })?;
                    dated.push((granularity.align(d), row));
                }
            }
        }
        dated.sort_by_key(|(d, _)| *d);

        let mut out = RecordSet::new(self.columns().iter().cloned())?;
        out.set_header_levels(self.header_levels().to_vec());

        let Some((first, _)) = dated.first() else {
            return Ok(out);
        };
        let last = dated.last().map(|(d, _)| *d).unwrap_or(*first);
        let end = through.map(|t| granularity.align(t)).unwrap_or(last).max(last);

        let mut cursor = *first;
        let mut pos = 0;
        let mut previous: Option<Vec<Value>> = None;
        while cursor <= end {
            let mut matched = false;
            while pos < dated.len() && dated[pos].0 == cursor {
                let mut row = dated[pos].1.clone();
                row[idx] = Value::Date(cursor);
                previous = Some(row.clone());
                out.push_row(row)?;
                pos += 1;
                matched = true;
            }
            if !matched && let Some(prev) = &previous {
                let mut row = prev.clone();
                row[idx] = Value::Date(cursor);
                out.push_row(row)?;
            }
            cursor = granularity.next(cursor);
        }
        Ok(out)
    }
}

fn position_or_push(items: &mut Vec<String>, value: &str) -> usize {
    match items.iter().position(|v| v == value) {
        Some(i) => i,
        None => {
            items.push(value.to_string());
            items.len() - 1
        }
    }
}
