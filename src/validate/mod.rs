//! Batch validation rules checked before anything is written

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dataset::RecordSet;
use crate::pipeline::{RunContext, StageError, Validator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Every listed column must be present
    RequiredColumns { columns: Vec<String> },
    /// Titles that must appear in one raw header row of a multi-row header file
    RequiredHeaders {
        /// Zero-based header row
        #[serde(default)]
        level: usize,
        titles: Vec<String>,
        /// Also reject titles that are not listed
        #[serde(default)]
        allow_only: bool,
    },
    /// Listed columns may not contain nulls
    NotNull { columns: Vec<String> },
    /// At least one row
    NonEmpty,
}

impl ValidationRule {
    /// Violations of this rule, empty when the batch passes
    pub fn check(&self, set: &RecordSet) -> Vec<String> {
        match self {
            Self::RequiredColumns { columns } => {
                let missing: Vec<&str> = columns
                    .iter()
                    .filter(|c| !set.has_column(c))
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    vec![]
                } else {
                    vec![format!("missing columns: {}", missing.join(", "))]
                }
            }
            Self::RequiredHeaders {
                level,
                titles,
                allow_only,
            } => check_headers(set, *level, titles, *allow_only),
            Self::NotNull { columns } => columns
                .iter()
                .filter_map(|c| match set.null_count(c) {
                    Ok(0) => None,
                    Ok(n) => Some(format!("column '{c}' has {n} null values")),
                    Err(_) => Some(format!("missing column '{c}'")),
                })
                .collect(),
            Self::NonEmpty if set.is_empty() => vec!["no rows".to_string()],
            Self::NonEmpty => vec![],
        }
    }
}

fn check_headers(set: &RecordSet, level: usize, titles: &[String], allow_only: bool) -> Vec<String> {
    let Some(row) = set.header_levels().get(level) else {
        return vec![format!("header row {} not present", level + 1)];
    };
    let present: Vec<String> = row
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    let wanted: Vec<String> = titles.iter().map(|t| t.trim().to_lowercase()).collect();

    let mut violations = Vec::new();
    let missing: Vec<&str> = titles
        .iter()
        .zip(&wanted)
        .filter(|(_, w)| !present.contains(w))
        .map(|(t, _)| t.as_str())
        .collect();
    if !missing.is_empty() {
        violations.push(format!(
            "header row {} is missing: {}",
            level + 1,
            missing.join(", ")
        ));
    }
    if allow_only {
        let mut unexpected: Vec<&str> = row
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty() && !wanted.contains(&t.to_lowercase()))
            .collect();
        unexpected.dedup();
        if !unexpected.is_empty() {
            violations.push(format!(
                "header row {} has unexpected titles: {}",
                level + 1,
                unexpected.join(", ")
            ));
        }
    }
    violations
}

/// Checks every configured rule and reports all violations together
pub struct RuleValidator {
    rules: Vec<ValidationRule>,
}

impl RuleValidator {
    pub fn new(rules: Vec<ValidationRule>) -> Self {
        Self { rules }
    }

    pub fn check(&self, set: &RecordSet) -> Result<(), StageError> {
        let violations: Vec<String> = self.rules.iter().flat_map(|r| r.check(set)).collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(StageError::validation(violations.join("; ")))
        }
    }
}

#[async_trait]
impl Validator for RuleValidator {
    async fn validate(&self, ctx: &RunContext<'_>, set: &RecordSet) -> Result<(), StageError> {
        self.check(set)?;
        if !self.rules.is_empty() {
            ctx.log
                .info(format!("Validation passed ({} rules, {} rows)", self.rules.len(), set.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use crate::pipeline::FailureKind;

    fn uploaded() -> RecordSet {
        let mut set = RecordSet::from_rows(
            ["State|", "Area|Kharif", "Area|Rabi"],
            vec![vec![Value::from("Odisha"), Value::Null, Value::Integer(5)]],
        )
        .unwrap();
        set.set_header_levels(vec![
            vec!["State".into(), "Area".into(), "Area".into()],
            vec!["".into(), "Kharif".into(), "Rabi".into()],
        ]);
        set
    }

    #[test]
    fn test_all_violations_reported_together() {
        let validator = RuleValidator::new(vec![
            ValidationRule::RequiredColumns {
                columns: vec!["State|".to_string(), "District|".to_string()],
            },
            ValidationRule::NotNull {
                columns: vec!["Area|Kharif".to_string()],
            },
        ]);
        let err = validator.check(&uploaded()).unwrap_err();
        assert_eq!(err.kind, FailureKind::Validation);
        assert!(err.message.contains("missing columns: District|"));
        assert!(err.message.contains("'Area|Kharif' has 1 null values"));
    }

    #[test]
    fn test_required_headers() {
        let set = uploaded();
        let ok = ValidationRule::RequiredHeaders {
            level: 1,
            titles: vec!["kharif".to_string(), "Rabi".to_string()],
            allow_only: true,
        };
        assert!(ok.check(&set).is_empty());

        let strict = ValidationRule::RequiredHeaders {
            level: 0,
            titles: vec!["State".to_string(), "Yield".to_string()],
            allow_only: true,
        };
        let violations = strict.check(&set);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("missing: Yield"));
        assert!(violations[1].contains("unexpected titles: Area"));

        let absent = ValidationRule::RequiredHeaders {
            level: 4,
            titles: vec![],
            allow_only: false,
        };
        assert_eq!(absent.check(&set), vec!["header row 5 not present"]);
    }

    #[test]
    fn test_non_empty() {
        let empty = RecordSet::new(["a"]).unwrap();
        assert!(RuleValidator::new(vec![ValidationRule::NonEmpty]).check(&empty).is_err());
        assert!(RuleValidator::new(vec![]).check(&empty).is_ok());
    }
}
