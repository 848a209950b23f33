//! Configurable transform steps
//!
//! A source's `transform` list is applied in order to each extracted batch.
//! Steps are pure functions of the record set and a [`ReferenceSnapshot`]
//! loaded once per batch; any failing step fails the whole batch.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dataset::{RecordSet, Value};
use crate::pipeline::{RunContext, StageError, Transformer};
use crate::utils::time::Granularity;

pub mod reference;
mod steps;

pub use reference::{NoReferenceData, ReferenceData, ReferenceSnapshot, SynonymEntry};
pub use steps::normalize_column_name;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformStep {
    /// Lowercase, non-letters to `_`, repeats collapsed, edges trimmed
    NormalizeColumnNames,
    Rename {
        columns: BTreeMap<String, String>,
    },
    DropColumns {
        columns: Vec<String>,
    },
    Constant {
        column: String,
        value: Value,
    },
    BlankToNull,
    ParseDate {
        column: String,
        /// chrono format string; loose ISO/compact parsing when absent
        #[serde(default)]
        format: Option<String>,
    },
    ForwardFill {
        column: String,
    },
    DropNulls {
        columns: Vec<String>,
    },
    Melt {
        id_columns: Vec<String>,
        #[serde(default)]
        value_columns: Vec<String>,
        variable_column: String,
        value_column: String,
    },
    StackHeaderLevel {
        #[serde(default = "default_separator")]
        separator: String,
        level_column: String,
    },
    Arithmetic {
        column: String,
        left: Operand,
        operator: ArithmeticOp,
        right: Operand,
    },
    FillDateSpine {
        date_column: String,
        granularity: Granularity,
        /// Extend the spine up to the run date instead of the last row
        #[serde(default)]
        through_run_date: bool,
    },
    ConvertCurrency {
        amount_column: String,
        date_column: String,
        currency: String,
        /// Defaults to overwriting `amount_column`
        #[serde(default)]
        output_column: Option<String>,
    },
    Standardize {
        column: String,
        lookup: String,
        #[serde(default)]
        when: Option<Condition>,
        #[serde(default)]
        uppercase: bool,
    },
    RequestDate {
        column: String,
    },
}

fn default_separator() -> String {
    crate::config::DEFAULT_HEADER_SEPARATOR.to_string()
}

/// Column name or numeric literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Literal(f64),
    Column(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    #[serde(alias = "+")]
    Add,
    #[serde(alias = "-")]
    Subtract,
    #[serde(alias = "*")]
    Multiply,
    #[serde(alias = "/")]
    Divide,
}

/// Row filter for conditional steps: `column` equals `equals` (case-insensitive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub equals: String,
}

impl TransformStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NormalizeColumnNames => "normalize_column_names",
            Self::Rename { .. } => "rename",
            Self::DropColumns { .. } => "drop_columns",
            Self::Constant { .. } => "constant",
            Self::BlankToNull => "blank_to_null",
            Self::ParseDate { .. } => "parse_date",
            Self::ForwardFill { .. } => "forward_fill",
            Self::DropNulls { .. } => "drop_nulls",
            Self::Melt { .. } => "melt",
            Self::StackHeaderLevel { .. } => "stack_header_level",
            Self::Arithmetic { .. } => "arithmetic",
            Self::FillDateSpine { .. } => "fill_date_spine",
            Self::ConvertCurrency { .. } => "convert_currency",
            Self::Standardize { .. } => "standardize",
            Self::RequestDate { .. } => "request_date",
        }
    }

    /// Reference lookup this step reads, if any
    pub fn lookup_name(&self) -> Option<&str> {
        match self {
            Self::Standardize { lookup, .. } => Some(lookup),
            _ => None,
        }
    }

    pub fn needs_exchange_rates(&self) -> bool {
        matches!(self, Self::ConvertCurrency { .. })
    }
}

/// Apply `steps` in order; the first failing step aborts with a transform failure
pub fn apply_steps(
    mut set: RecordSet,
    steps: &[TransformStep],
    snapshot: &ReferenceSnapshot,
    run_date: NaiveDate,
) -> Result<RecordSet, StageError> {
    for (idx, step) in steps.iter().enumerate() {
        set = steps::apply(set, step, snapshot, run_date).map_err(|e| {
            StageError::transform(format!("step {} ({}): {e}", idx + 1, step.name()))
        })?;
    }
    Ok(set)
}

/// Transformer driven by a source's configured step list
pub struct StepTransformer {
    steps: Vec<TransformStep>,
}

impl StepTransformer {
    pub fn new(steps: Vec<TransformStep>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl Transformer for StepTransformer {
    async fn transform(&self, ctx: &RunContext<'_>, set: RecordSet) -> Result<RecordSet, StageError> {
        if self.steps.is_empty() {
            return Ok(set);
        }
        let snapshot = ReferenceSnapshot::load(ctx.reference, &self.steps)
            .await
            .map_err(|e| StageError::transform(format!("loading reference data: {e}")))?;
        let rows_in = set.len();
        let out = apply_steps(set, &self.steps, &snapshot, ctx.run_date)?;
        ctx.log.info(format!(
            "Applied {} transform steps ({} rows in, {} rows out)",
            self.steps.len(),
            rows_in,
            out.len()
        ));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::FailureKind;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_steps_deserialize_from_toml() {
        let config = Config::from_toml_str(
            r#"
[reference.lookups.states]
table = "reporting.state_lookup"
canonical_column = "StateName"
synonyms_column = "Synonyms"

[[sources.crops.transform]]
op = "normalize_column_names"

[[sources.crops.transform]]
op = "standardize"
column = "state"
lookup = "states"
uppercase = true
when = { column = "level", equals = "State" }

[[sources.crops.transform]]
op = "arithmetic"
column = "production"
left = "area"
operator = "*"
right = 1000

[[sources.crops.transform]]
op = "fill_date_spine"
date_column = "date"
granularity = "monthly"
through_run_date = true
"#,
        )
        .unwrap();
        let steps = &config.sources["crops"].transform;
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0], TransformStep::NormalizeColumnNames);
        assert_eq!(steps[1].lookup_name(), Some("states"));
        assert_eq!(
            steps[2],
            TransformStep::Arithmetic {
                column: "production".to_string(),
                left: Operand::Column("area".to_string()),
                operator: ArithmeticOp::Multiply,
                right: Operand::Literal(1000.0),
            }
        );
        assert!(matches!(
            steps[3],
            TransformStep::FillDateSpine {
                granularity: Granularity::Monthly,
                through_run_date: true,
                ..
            }
        ));
    }

    #[test]
    fn test_failing_step_names_position_and_kind() {
        let set = RecordSet::from_rows(["a"], vec![vec![Value::Integer(1)]]).unwrap();
        let steps = vec![
            TransformStep::NormalizeColumnNames,
            TransformStep::ForwardFill {
                column: "missing".to_string(),
            },
        ];
        let err = apply_steps(set, &steps, &ReferenceSnapshot::default(), run_date()).unwrap_err();
        assert_eq!(err.kind, FailureKind::Transform);
        assert!(err.message.contains("step 2 (forward_fill)"), "{}", err.message);
        assert!(err.message.contains("missing"));
    }
}
