//! Minimal HTML table extraction
//!
//! Works on raw page source by slicing tag blocks case-insensitively. Nested
//! tables and `colspan`/`rowspan` are not interpreted; cells are taken in
//! document order.

use serde::{Deserialize, Serialize};

use crate::dataset::delimited::column_names;
use crate::dataset::{RecordSet, Value};
use crate::errors::{AppResult, SourceError};

/// Which `<table>` on the page to read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSelector {
    /// Match the table's `id` attribute
    #[serde(default)]
    pub id: Option<String>,
    /// Zero-based position among matching tables
    #[serde(default)]
    pub index: usize,
}

/// Lowercases ASCII only, so byte offsets stay valid for the original text
fn to_lower(s: &str) -> String {
    s.chars().map(|c| c.to_ascii_lowercase()).collect()
}

/// Start of the next `<tag` (followed by `>`, `/` or whitespace) at or after `from`
fn find_open_tag(lower: &str, tag: &str, from: usize) -> Option<usize> {
    let pattern = format!("<{tag}");
    let mut pos = from;
    while let Some(rel) = lower.get(pos..)?.find(&pattern) {
        let start = pos + rel;
        match lower[start + pattern.len()..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => return Some(start),
            None => return None,
            _ => pos = start + pattern.len(),
        }
    }
    None
}

/// `(start, end)` byte span of the next `<tag ...>...</tag>` block
fn next_block(s: &str, lower: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let start = find_open_tag(lower, tag, from)?;
    let open_end = s[start..].find('>')? + start + 1;
    let close = format!("</{tag}");
    let end = match lower[open_end..].find(&close) {
        Some(rel) => {
            let close_start = open_end + rel;
            lower[close_start..]
                .find('>')
                .map(|gt| close_start + gt + 1)
                .unwrap_or(lower.len())
        }
        // Unclosed cells and rows end where the next sibling starts
        None => find_open_tag(lower, tag, open_end).unwrap_or(s.len()),
    };
    Some((start, end))
}

fn inner_after_open_tag(block: &str) -> &str {
    let Some(open_end) = block.find('>') else {
        return "";
    };
    match block.rfind("</") {
        Some(close) if close > open_end => &block[open_end + 1..close],
        _ => &block[open_end + 1..],
    }
}

fn normalize_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    normalize_ws(&normalize_entities(&out))
}

fn has_id(open_tag: &str, id: &str) -> bool {
    let lower = to_lower(open_tag);
    let id = to_lower(id);
    lower.contains(&format!("id=\"{id}\""))
        || lower.contains(&format!("id='{id}'"))
        || lower.contains(&format!("id={id} "))
        || lower.contains(&format!("id={id}>"))
}

/// The selected `<table>...</table>` block, if the page has one
pub fn find_table<'a>(html: &'a str, selector: &TableSelector) -> Option<&'a str> {
    let lower = to_lower(html);
    let mut from = 0;
    let mut seen = 0;
    while let Some((start, end)) = next_block(html, &lower, "table", from) {
        let block = &html[start..end];
        let open_tag = &block[..block.find('>').map(|i| i + 1).unwrap_or(block.len())];
        let matches = selector.id.as_deref().is_none_or(|id| has_id(open_tag, id));
        if matches {
            if seen == selector.index {
                return Some(block);
            }
            seen += 1;
        }
        from = end;
    }
    None
}

struct Row {
    header: bool,
    cells: Vec<String>,
}

fn row_cells(row_html: &str) -> Row {
    let lower = to_lower(row_html);
    let mut cells = Vec::new();
    let mut all_th = true;
    let mut pos = 0;
    loop {
        let td = next_block(row_html, &lower, "td", pos);
        let th = next_block(row_html, &lower, "th", pos);
        let (span, is_th) = match (td, th) {
            (Some(a), Some(b)) if b.0 < a.0 => (b, true),
            (Some(a), _) => (a, false),
            (None, Some(b)) => (b, true),
            (None, None) => break,
        };
        all_th &= is_th;
        cells.push(strip_tags(inner_after_open_tag(&row_html[span.0..span.1])));
        pos = span.1;
    }
    Row {
        header: all_th && !cells.is_empty(),
        cells,
    }
}

/// Parse a `<table>` block: the first all-`<th>` row (or else the first row)
/// names the columns, the remaining rows become records.
///
/// Short rows are padded with nulls. A row with non-blank cells beyond the
/// header is an error, since the page layout no longer matches the header.
pub fn parse_table(table_html: &str) -> AppResult<RecordSet> {
    let lower = to_lower(table_html);
    let mut rows = Vec::new();
    let mut pos = 0;
    while let Some((start, end)) = next_block(table_html, &lower, "tr", pos) {
        let row = row_cells(&table_html[start..end]);
        if !row.cells.is_empty() {
            rows.push(row);
        }
        pos = end;
    }
    if rows.is_empty() {
        return Ok(RecordSet::default());
    }

    let header_idx = rows.iter().position(|r| r.header).unwrap_or(0);
    let header = rows[header_idx].cells.clone();
    let width = header.len();
    let columns = column_names(&[header], "|");

    let mut set = RecordSet::new(columns).map_err(|e| SourceError::parse("html", e.to_string()))?;
    for row in rows.into_iter().skip(header_idx + 1) {
        if row.header || row.cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        let mut cells = row.cells;
        if cells.len() > width && cells[width..].iter().any(|c| !c.is_empty()) {
            return Err(SourceError::parse(
                "html",
                format!(
                    "data row {} has {} cells but the header has {width}",
                    set.len() + 1,
                    cells.len()
                ),
            )
            .into());
        }
        cells.resize(width, String::new());
        set.push_row(cells.iter().map(|c| Value::infer(c)).collect())
            .map_err(|e| SourceError::parse("html", e.to_string()))?;
    }
    Ok(set)
}
