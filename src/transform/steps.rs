use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::{ArithmeticOp, Condition, Operand, ReferenceSnapshot, TransformStep};
use crate::dataset::{DatasetError, DatasetResult, RecordSet, Value};
use crate::utils::time::parse_loose_date;

/// Offending values listed in a failure message before it is cut short
const MAX_REPORTED: usize = 10;

fn non_letters() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z]+").unwrap_or_else(|_| unreachable!("static pattern")))
}

/// `"Area (Hectare)|Kharif"` -> `area_hectare_kharif`
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.replace('"', "").to_lowercase();
    non_letters()
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

pub(super) fn apply(
    mut set: RecordSet,
    step: &TransformStep,
    snapshot: &ReferenceSnapshot,
    run_date: NaiveDate,
) -> DatasetResult<RecordSet> {
    match step {
        TransformStep::NormalizeColumnNames => {
            set.rename_all(normalize_column_name)?;
        }
        TransformStep::Rename { columns } => {
            for (from, to) in columns {
                set.rename_column(from, to)?;
            }
        }
        TransformStep::DropColumns { columns } => set.drop_columns(columns),
        TransformStep::Constant { column, value } => set.add_column(column, value.clone()),
        TransformStep::BlankToNull => set.map_values(|v| {
            (matches!(v, Value::Text(_)) && v.is_blank()).then_some(Value::Null)
        }),
        TransformStep::ParseDate { column, format } => parse_dates(&mut set, column, format.as_deref())?,
        TransformStep::ForwardFill { column } => set.forward_fill(column)?,
        TransformStep::DropNulls { columns } => {
            let indices = column_indices(&set, columns)?;
            set.retain_rows(|_, row| indices.iter().all(|i| !row[*i].is_null()));
        }
        TransformStep::Melt {
            id_columns,
            value_columns,
            variable_column,
            value_column,
        } => return set.melt(id_columns, value_columns, variable_column, value_column),
        TransformStep::StackHeaderLevel {
            separator,
            level_column,
        } => return set.stack_header_level(separator, level_column),
        TransformStep::Arithmetic {
            column,
            left,
            operator,
            right,
        } => arithmetic(&mut set, column, left, *operator, right)?,
        TransformStep::FillDateSpine {
            date_column,
            granularity,
            through_run_date,
        } => {
            let through = through_run_date.then_some(run_date);
            return set.fill_date_spine(date_column, *granularity, through);
        }
        TransformStep::ConvertCurrency {
            amount_column,
            date_column,
            currency,
            output_column,
        } => convert_currency(
            &mut set,
            amount_column,
            date_column,
            currency,
            output_column.as_deref().unwrap_or(amount_column),
            snapshot,
        )?,
        TransformStep::Standardize {
            column,
            lookup,
            when,
            uppercase,
        } => standardize(&mut set, column, lookup, when.as_ref(), *uppercase, snapshot)?,
        TransformStep::RequestDate { column } => set.add_column(column, Value::Date(run_date)),
    }
    Ok(set)
}

fn column_indices(set: &RecordSet, columns: &[String]) -> DatasetResult<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            set.column_index(c)
                .ok_or_else(|| DatasetError::UnknownColumn(c.clone()))
        })
        .collect()
}

fn require(set: &RecordSet, column: &str) -> DatasetResult<usize> {
    set.column_index(column)
        .ok_or_else(|| DatasetError::UnknownColumn(column.to_string()))
}

fn listed<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    let values: Vec<&String> = values.into_iter().collect();
    let mut out = values
        .iter()
        .take(MAX_REPORTED)
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ");
    if values.len() > MAX_REPORTED {
        out.push_str(&format!(" and {} more", values.len() - MAX_REPORTED));
    }
    out
}

fn parse_with(raw: &str, format: Option<&str>) -> Option<NaiveDate> {
    let raw = raw.trim();
    match format {
        Some(fmt) => NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(raw, fmt).ok().map(|dt| dt.date())),
        None => parse_loose_date(raw),
    }
}

fn parse_dates(set: &mut RecordSet, column: &str, format: Option<&str>) -> DatasetResult<()> {
    let idx = require(set, column)?;
    let mut bad = BTreeSet::new();
    let mut parsed = Vec::with_capacity(set.len());
    for row in set.rows() {
        let value = match &row[idx] {
            Value::Null => Value::Null,
            Value::Date(d) => Value::Date(*d),
            Value::Timestamp(ts) => Value::Date(ts.date()),
            other => {
                let raw = other.to_string();
                match parse_with(&raw, format) {
                    Some(d) => Value::Date(d),
                    None => {
                        bad.insert(raw);
                        Value::Null
                    }
                }
            }
        };
        parsed.push(value);
    }
    if !bad.is_empty() {
        return Err(DatasetError::Invalid(format!(
            "unparseable dates in '{column}': {}",
            listed(&bad)
        )));
    }
    for (row, value) in parsed.into_iter().enumerate() {
        set.set(row, column, value)?;
    }
    Ok(())
}

enum ResolvedOperand {
    Column(usize),
    Literal(f64),
}

impl ResolvedOperand {
    fn value(&self, row: &[Value]) -> Option<f64> {
        match self {
            Self::Column(idx) => row[*idx].as_f64(),
            Self::Literal(v) => Some(*v),
        }
    }
}

fn resolve_operand(set: &RecordSet, operand: &Operand) -> DatasetResult<ResolvedOperand> {
    Ok(match operand {
        Operand::Literal(v) => ResolvedOperand::Literal(*v),
        Operand::Column(c) => ResolvedOperand::Column(require(set, c)?),
    })
}

fn arithmetic(
    set: &mut RecordSet,
    column: &str,
    left: &Operand,
    operator: ArithmeticOp,
    right: &Operand,
) -> DatasetResult<()> {
    let left = resolve_operand(set, left)?;
    let right = resolve_operand(set, right)?;
    set.add_column_with(column, |_, row| {
        let (Some(l), Some(r)) = (left.value(row), right.value(row)) else {
            return Value::Null;
        };
        let result = match operator {
            ArithmeticOp::Add => l + r,
            ArithmeticOp::Subtract => l - r,
            ArithmeticOp::Multiply => l * r,
            ArithmeticOp::Divide if r == 0.0 => return Value::Null,
            ArithmeticOp::Divide => l / r,
        };
        if result.is_finite() {
            Value::Number(result)
        } else {
            Value::Null
        }
    });
    Ok(())
}

fn convert_currency(
    set: &mut RecordSet,
    amount_column: &str,
    date_column: &str,
    currency: &str,
    output_column: &str,
    snapshot: &ReferenceSnapshot,
) -> DatasetResult<()> {
    let amount_idx = require(set, amount_column)?;
    let date_idx = require(set, date_column)?;

    let mut missing = BTreeSet::new();
    let mut converted = Vec::with_capacity(set.len());
    for row in set.rows() {
        let Some(amount) = row[amount_idx].as_f64() else {
            converted.push(Value::Null);
            continue;
        };
        let Some(date) = row[date_idx].as_date() else {
            missing.insert(format!("{} (not a date)", row[date_idx]));
            converted.push(Value::Null);
            continue;
        };
        match snapshot.rate_on(currency, date) {
            Some(rate) => converted.push(Value::Number(amount * rate)),
            None => {
                missing.insert(date.to_string());
                converted.push(Value::Null);
            }
        }
    }
    if !missing.is_empty() {
        return Err(DatasetError::Invalid(format!(
            "no {currency} exchange rate for {}",
            listed(&missing)
        )));
    }

    let mut values = converted.into_iter();
    set.add_column_with(output_column, |_, _| values.next().unwrap_or(Value::Null));
    Ok(())
}

fn standardize(
    set: &mut RecordSet,
    column: &str,
    lookup: &str,
    when: Option<&Condition>,
    uppercase: bool,
    snapshot: &ReferenceSnapshot,
) -> DatasetResult<()> {
    let idx = require(set, column)?;
    let condition = match when {
        Some(c) => Some((require(set, &c.column)?, c.equals.trim().to_lowercase())),
        None => None,
    };

    let mut unresolved = BTreeSet::new();
    let mut updates = Vec::new();
    for (row_idx, row) in set.rows().iter().enumerate() {
        if let Some((cond_idx, expected)) = &condition
            && row[*cond_idx].to_string().trim().to_lowercase() != *expected
        {
            continue;
        }
        let raw = match &row[idx] {
            Value::Null => continue,
            v => v.to_string(),
        };
        match snapshot.resolve(lookup, &raw) {
            Some(canonical) if uppercase => updates.push((row_idx, canonical.to_uppercase())),
            Some(canonical) => updates.push((row_idx, canonical.to_string())),
            None => {
                unresolved.insert(raw.trim().to_string());
            }
        }
    }
    if !unresolved.is_empty() {
        return Err(DatasetError::Invalid(format!(
            "unresolved '{column}' values for lookup '{lookup}': {}",
            listed(&unresolved)
        )));
    }
    for (row_idx, value) in updates {
        set.set(row_idx, column, Value::Text(value))?;
    }
    Ok(())
}
