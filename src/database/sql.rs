//! SQL text helpers: identifier quoting, value binding and named parameters
//!
//! Values never reach SQL text. Identifiers (table and column names come from
//! configuration and file headers) are validated and quoted per backend.

use sea_orm::{DatabaseBackend, Value as SeaValue};
use std::collections::BTreeMap;

use crate::dataset::Value;
use crate::errors::{RepositoryError, RepositoryResult};

/// Named parameters for flow statements
pub type SqlParams = BTreeMap<String, Value>;

const MAX_IDENTIFIER_LEN: usize = 128;

/// Reject identifiers that could break out of quoting
pub fn validate_identifier(name: &str) -> RepositoryResult<()> {
    if name.trim().is_empty() {
        return Err(RepositoryError::invalid_identifier(name, "is empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(RepositoryError::invalid_identifier(
            name,
            format!("longer than {MAX_IDENTIFIER_LEN} characters"),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| matches!(c, '"' | '`' | ';' | '\\') || c.is_control())
    {
        return Err(RepositoryError::invalid_identifier(
            name,
            format!("contains forbidden character {bad:?}"),
        ));
    }
    Ok(())
}

pub fn quote_identifier(backend: DatabaseBackend, name: &str) -> RepositoryResult<String> {
    validate_identifier(name)?;
    Ok(match backend {
        DatabaseBackend::MySql => format!("`{name}`"),
        _ => format!("\"{name}\""),
    })
}

/// Quote `table` or `schema.table`
pub fn quote_table(backend: DatabaseBackend, name: &str) -> RepositoryResult<String> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(RepositoryError::invalid_identifier(
            name,
            "expected 'table' or 'schema.table'",
        ));
    }
    let quoted = parts
        .iter()
        .map(|p| quote_identifier(backend, p))
        .collect::<RepositoryResult<Vec<_>>>()?;
    Ok(quoted.join("."))
}

/// Expression casting `expr` to text, used to read watermarks of any column type
pub fn cast_text(backend: DatabaseBackend, expr: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("CAST({expr} AS CHAR(64))"),
        _ => format!("CAST({expr} AS VARCHAR(64))"),
    }
}

pub fn cast_float(backend: DatabaseBackend, expr: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("CAST({expr} AS DOUBLE)"),
        _ => format!("CAST({expr} AS DOUBLE PRECISION)"),
    }
}

pub fn to_sea_value(value: &Value) -> SeaValue {
    match value {
        Value::Null => SeaValue::String(None),
        Value::Bool(b) => SeaValue::from(*b),
        Value::Integer(i) => SeaValue::from(*i),
        Value::Number(n) => SeaValue::from(*n),
        Value::Date(d) => SeaValue::from(*d),
        Value::Timestamp(ts) => SeaValue::from(*ts),
        Value::Text(s) => SeaValue::from(s.clone()),
    }
}

/// Accumulates bound values and hands out backend placeholders.
///
/// Nulls are written as a literal `NULL` so that no type has to be guessed
/// for them.
pub struct Binder {
    backend: DatabaseBackend,
    values: Vec<SeaValue>,
}

impl Binder {
    pub fn new(backend: DatabaseBackend) -> Self {
        Self {
            backend,
            values: Vec::new(),
        }
    }

    pub fn bind(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.values.push(to_sea_value(value));
        match self.backend {
            DatabaseBackend::Postgres => format!("${}", self.values.len()),
            _ => "?".to_string(),
        }
    }

    pub fn into_values(self) -> Vec<SeaValue> {
        self.values
    }
}

/// Rewrite named parameters into bound placeholders.
///
/// Recognises `:name` and pyformat `%(name)s`. Quoted literals, quoted
/// identifiers, comments and `::` casts are not scanned for parameters. In
/// pyformat statements `%%` is unescaped to `%`, inside literals too.
pub fn bind_named(
    backend: DatabaseBackend,
    sql: &str,
    params: &SqlParams,
) -> RepositoryResult<(String, Vec<SeaValue>)> {
    let chars: Vec<char> = sql.chars().collect();
    let pyformat = sql.contains("%(");
    let mut binder = Binder::new(backend);
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    let lookup = |name: &str, binder: &mut Binder| -> RepositoryResult<String> {
        params
            .get(name)
            .map(|v| binder.bind(v))
            .ok_or_else(|| RepositoryError::MissingParameter {
                name: name.to_string(),
            })
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\'' | '"' | '`' => {
                let end = closing_quote(&chars, i, c);
                let literal: String = chars[i..end].iter().collect();
                if pyformat {
                    out.push_str(&literal.replace("%%", "%"));
                } else {
                    out.push_str(&literal);
                }
                i = end;
            }
            '-' if next == Some('-') => {
                let end = chars[i..]
                    .iter()
                    .position(|ch| *ch == '\n')
                    .map(|p| i + p)
                    .unwrap_or(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if next == Some('*') => {
                let mut end = i + 2;
                while end < chars.len() && !(chars[end - 1] == '*' && chars[end] == '/' && end > i + 2) {
                    end += 1;
                }
                let end = (end + 1).min(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            ':' if next == Some(':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if next.is_some_and(is_ident_start) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                out.push_str(&lookup(&name, &mut binder)?);
                i = end;
            }
            '%' if pyformat && next == Some('%') => {
                out.push('%');
                i += 2;
            }
            '%' if pyformat && next == Some('(') => {
                let close = chars[i..].iter().position(|ch| *ch == ')').map(|p| i + p);
                match close {
                    Some(close) if chars.get(close + 1) == Some(&'s') => {
                        let name: String = chars[i + 2..close].iter().collect();
                        out.push_str(&lookup(name.trim(), &mut binder)?);
                        i = close + 2;
                    }
                    _ => {
                        out.push(c);
                        i += 1;
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok((out, binder.into_values()))
}

/// Index just past the closing quote; doubled quotes are escapes
fn closing_quote(chars: &[char], open: usize, quote: char) -> usize {
    let mut j = open + 1;
    while j < chars.len() {
        if chars[j] == quote {
            if chars.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
