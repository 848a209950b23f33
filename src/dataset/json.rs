//! JSON record arrays into record sets

use serde_json::Value as JsonValue;

use super::{RecordSet, Value};
use crate::errors::{AppResult, SourceError};

/// Convert an array of JSON objects into a record set.
///
/// `records_key` selects a nested array (dotted path, e.g. `data.records`).
/// Columns are the union of object keys, ordered by the first object each
/// key appears in; keys missing from an object are null.
pub fn records_from_json(document: &JsonValue, records_key: Option<&str>) -> AppResult<RecordSet> {
    let mut target = document;
    if let Some(path) = records_key {
        for part in path.split('.').filter(|p| !p.is_empty()) {
            target = target.get(part).ok_or_else(|| {
                SourceError::parse("json", format!("response has no '{path}' field"))
            })?;
        }
    }

    let items = match target {
        JsonValue::Array(items) => items,
        JsonValue::Null => return Ok(RecordSet::default()),
        other => {
            return Err(SourceError::parse(
                "json",
                format!("expected an array of records, found {}", json_type(other)),
            )
            .into());
        }
    };

    let mut columns: Vec<String> = Vec::new();
    for item in items {
        let object = item.as_object().ok_or_else(|| {
            SourceError::parse("json", format!("expected record objects, found {}", json_type(item)))
        })?;
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut set = RecordSet::new(columns.iter().cloned())
        .map_err(|e| SourceError::parse("json", e.to_string()))?;
    for item in items {
        let row = columns
            .iter()
            .map(|c| item.get(c).map(Value::from_json).unwrap_or(Value::Null))
            .collect();
        set.push_row(row)
            .map_err(|e| SourceError::parse("json", e.to_string()))?;
    }
    Ok(set)
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_union_of_keys() {
        let doc = json!([
            {"date": "2024-01-01", "price": 10},
            {"date": "2024-01-02", "market": "Delhi"}
        ]);
        let set = records_from_json(&doc, None).unwrap();
        assert_eq!(set.columns(), &["date", "price", "market"]);
        assert_eq!(set.get(1, "price"), Some(&Value::Null));
        assert_eq!(set.get(1, "market"), Some(&Value::from("Delhi")));
    }

    #[test]
    fn test_nested_records_key() {
        let doc = json!({"data": {"records": [{"a": 1}]}});
        let set = records_from_json(&doc, Some("data.records")).unwrap();
        assert_eq!(set.len(), 1);

        let err = records_from_json(&doc, Some("rows")).unwrap_err();
        assert!(err.to_string().contains("no 'rows' field"));
    }

    #[test]
    fn test_empty_and_null() {
        assert!(records_from_json(&json!([]), None).unwrap().is_empty());
        assert!(records_from_json(&json!({"d": null}), Some("d")).unwrap().is_empty());
    }

    #[test]
    fn test_non_array_rejected() {
        assert!(records_from_json(&json!({"a": 1}), None).is_err());
        assert!(records_from_json(&json!([1, 2]), None).is_err());
    }
}
