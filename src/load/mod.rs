//! Staging and reporting loaders
//!
//! Staging writes each unit's batch into the source's staging table in one
//! committed transaction. Reporting replays the flow statements registered
//! for the source in the flow definition table, in ascending sequence order,
//! committing after each statement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{FlowTableConfig, StagingTarget};
use crate::database::FlowRepository;
use crate::database::StagingRepository;
use crate::database::sql::SqlParams;
use crate::dataset::{RecordSet, Value};
use crate::pipeline::{ReportingLoader, RunContext, StageError, StagingLoader, WorkUnit};

pub use crate::database::LoadMode;

/// When a flow step runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowScope {
    /// After every committed unit, with that unit's date
    PerUnit,
    /// Once after all units, if at least one unit loaded
    #[default]
    PerRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinParam {
    UnitDate,
    UnitLabel,
    RunDate,
    /// The current `for_each` value
    ForEach,
}

/// Where a named flow parameter gets its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSource {
    Builtin(BuiltinParam),
    Literal { value: Value },
}

/// A group of flow statements for one data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub data_source: String,
    /// Restrict the lookup to rows with this update mode (e.g. `Delta`)
    #[serde(default)]
    pub update_mode: Option<String>,
    /// Sequence numbers to run; executed in ascending order
    #[serde(default)]
    pub sequence: Vec<i64>,
    #[serde(default)]
    pub scope: FlowScope,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSource>,
    /// Repeat the statements once per value (e.g. per commodity)
    #[serde(default)]
    pub for_each: Vec<String>,
    /// Stored procedures to `CALL` after the statements
    #[serde(default)]
    pub procedures: Vec<String>,
}

impl FlowStep {
    fn ordered_sequence(&self) -> Vec<i64> {
        let mut sequence = self.sequence.clone();
        sequence.sort_unstable();
        sequence.dedup();
        sequence
    }

    fn bind_params(
        &self,
        ctx: &RunContext<'_>,
        unit: Option<&WorkUnit>,
        each: Option<&str>,
    ) -> Result<SqlParams, StageError> {
        let mut params = SqlParams::new();
        for (name, source) in &self.params {
            let value = match source {
                ParamSource::Literal { value } => value.clone(),
                ParamSource::Builtin(BuiltinParam::RunDate) => Value::Date(ctx.run_date),
                ParamSource::Builtin(BuiltinParam::UnitDate) => {
                    let date = unit.and_then(|u| u.date).ok_or_else(|| {
                        StageError::load(format!(
                            "flow {}: parameter '{name}' needs a unit date, only per_unit steps have one",
                            self.data_source
                        ))
                    })?;
                    Value::Date(date)
                }
                ParamSource::Builtin(BuiltinParam::UnitLabel) => {
                    let unit = unit.ok_or_else(|| {
                        StageError::load(format!(
                            "flow {}: parameter '{name}' needs a unit, only per_unit steps have one",
                            self.data_source
                        ))
                    })?;
                    Value::Text(unit.label.clone())
                }
                ParamSource::Builtin(BuiltinParam::ForEach) => {
                    let each = each.ok_or_else(|| {
                        StageError::load(format!(
                            "flow {}: parameter '{name}' needs a for_each list",
                            self.data_source
                        ))
                    })?;
                    Value::from(each)
                }
            };
            params.insert(name.clone(), value);
        }
        Ok(params)
    }
}

/// Appends (or upserts) each batch into the source's staging table
pub struct TableStagingLoader {
    target: StagingTarget,
    max_bind_params: usize,
}

impl TableStagingLoader {
    pub fn new(target: StagingTarget, max_bind_params: usize) -> Self {
        Self {
            target,
            max_bind_params,
        }
    }
}

#[async_trait]
impl StagingLoader for TableStagingLoader {
    async fn load_staging(&self, ctx: &RunContext<'_>, set: &RecordSet) -> Result<u64, StageError> {
        let inserted = StagingRepository::new(ctx.db)
            .insert(
                &self.target.table,
                set,
                self.target.mode,
                &self.target.key,
                self.max_bind_params,
            )
            .await
            .map_err(|e| StageError::load(format!("staging {}: {e}", self.target.table)))?;
        ctx.log
            .info(format!("Loaded {} rows into {}", inserted, self.target.table));
        Ok(inserted)
    }
}

/// Runs the configured flow steps against the flow definition table
pub struct FlowReportingLoader {
    steps: Vec<FlowStep>,
    table: FlowTableConfig,
}

impl FlowReportingLoader {
    pub fn new(steps: Vec<FlowStep>, table: FlowTableConfig) -> Self {
        Self { steps, table }
    }
}

#[async_trait]
impl ReportingLoader for FlowReportingLoader {
    async fn load_reporting(
        &self,
        ctx: &RunContext<'_>,
        scope: FlowScope,
        unit: Option<&WorkUnit>,
    ) -> Result<usize, StageError> {
        let repo = FlowRepository::new(ctx.db, &self.table);
        let mut executed = 0;

        for step in self.steps.iter().filter(|s| s.scope == scope) {
            let each_values: Vec<Option<&str>> = if step.for_each.is_empty() {
                vec![None]
            } else {
                step.for_each.iter().map(|v| Some(v.as_str())).collect()
            };

            for each in each_values {
                let params = step.bind_params(ctx, unit, each)?;
                let suffix = each.map(|v| format!(" [{v}]")).unwrap_or_default();
                for sequence in step.ordered_sequence() {
                    let affected = repo
                        .execute_sequence(&step.data_source, step.update_mode.as_deref(), sequence, &params)
                        .await
                        .map_err(|e| {
                            StageError::load(format!(
                                "flow {}/{}{suffix}: {e}",
                                step.data_source, sequence
                            ))
                        })?;
                    ctx.log.info(format!(
                        "Executed flow {}/{}{suffix} ({} rows affected)",
                        step.data_source, sequence, affected
                    ));
                    executed += 1;
                }
            }

            for procedure in &step.procedures {
                repo.call_procedure(procedure)
                    .await
                    .map_err(|e| StageError::load(format!("procedure {procedure}: {e}")))?;
                ctx.log.info(format!("Called procedure {procedure}"));
                executed += 1;
            }
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseConfig};
    use crate::database::Database;
    use crate::pipeline::RunLog;
    use crate::transform::NoReferenceData;
    use chrono::NaiveDate;
    use sea_orm::{ConnectionTrait, Statement};

    async fn setup() -> Database {
        let db = Database::connect(&DatabaseConfig::new("sqlite::memory:"))
            .await
            .unwrap();
        db.connection()
            .execute_unprepared(
                r#"
CREATE TABLE flow ("DataSource" TEXT, "UpdateMode" TEXT, "SeqNo" INTEGER, "QueryText" TEXT);
CREATE TABLE trail (step TEXT, d TEXT, commodity TEXT);
INSERT INTO flow VALUES
  ('prices', 'Delta', 2, 'INSERT INTO trail VALUES (''second'', :d, :c)'),
  ('prices', 'Delta', 1, 'INSERT INTO trail VALUES (''first'', :d, :c)'),
  ('summary', NULL, 1, 'INSERT INTO trail VALUES (''summary'', :run, NULL)');
"#,
            )
            .await
            .unwrap();
        db
    }

    fn flow_table() -> FlowTableConfig {
        FlowTableConfig {
            table: "flow".to_string(),
            ..FlowTableConfig::default()
        }
    }

    fn steps() -> Vec<FlowStep> {
        let config = Config::from_toml_str(
            r#"
[[sources.prices.reporting]]
data_source = "prices"
update_mode = "Delta"
sequence = [2, 1]
scope = "per_unit"
for_each = ["Onion", "Potato"]
params = { d = "unit_date", c = "for_each" }

[[sources.prices.reporting]]
data_source = "summary"
sequence = [1]
params = { run = "run_date" }
"#,
        )
        .unwrap();
        config.sources["prices"].reporting.clone()
    }

    async fn trail(db: &Database) -> Vec<(String, Option<String>)> {
        db.connection()
            .query_all(Statement::from_string(
                db.backend(),
                "SELECT step, commodity FROM trail ORDER BY rowid".to_string(),
            ))
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.try_get("", "step").unwrap(), r.try_get("", "commodity").unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_per_unit_steps_run_in_sequence_order_per_value() {
        let db = setup().await;
        let log = RunLog::in_memory("prices", "dev", chrono_tz::UTC);
        let reference = NoReferenceData;
        let ctx = RunContext {
            source: "prices",
            environment: "dev",
            run_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            db: &db,
            log: &log,
            reference: &reference,
        };
        let unit = WorkUnit::for_date(
            "2024-03-14".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
        );
        let loader = FlowReportingLoader::new(steps(), flow_table());

        let executed = loader
            .load_reporting(&ctx, FlowScope::PerUnit, Some(&unit))
            .await
            .unwrap();
        assert_eq!(executed, 4);
        assert_eq!(
            trail(&db).await,
            vec![
                ("first".to_string(), Some("Onion".to_string())),
                ("second".to_string(), Some("Onion".to_string())),
                ("first".to_string(), Some("Potato".to_string())),
                ("second".to_string(), Some("Potato".to_string())),
            ]
        );

        let executed = loader
            .load_reporting(&ctx, FlowScope::PerRun, None)
            .await
            .unwrap();
        assert_eq!(executed, 1);
        assert_eq!(trail(&db).await.len(), 5);
    }

    #[tokio::test]
    async fn test_unit_date_outside_unit_scope_fails() {
        let db = setup().await;
        let log = RunLog::in_memory("prices", "dev", chrono_tz::UTC);
        let reference = NoReferenceData;
        let ctx = RunContext {
            source: "prices",
            environment: "dev",
            run_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            db: &db,
            log: &log,
            reference: &reference,
        };
        let mut step = steps().remove(0);
        step.scope = FlowScope::PerRun;
        let loader = FlowReportingLoader::new(vec![step], flow_table());
        let err = loader
            .load_reporting(&ctx, FlowScope::PerRun, None)
            .await
            .unwrap_err();
        assert!(err.message.contains("needs a unit date"), "{}", err.message);
        assert!(trail(&db).await.is_empty());
    }
}
