//! Date-driven runs against a file-backed SQLite database: partial-prefix
//! durability, resume from the watermark, reporting order and the
//! validation gate.

mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::{Arc, Mutex};

use common::{ENV, Harness};
use etl_jobs::config::{ReferenceConfig, StagingTarget};
use etl_jobs::database::FlowRepository;
use etl_jobs::database::sql::SqlParams;
use etl_jobs::dataset::{RecordSet, Value};
use etl_jobs::load::{FlowReportingLoader, FlowScope, FlowStep, LoadMode, TableStagingLoader};
use etl_jobs::pipeline::{
    Extractor, FailureKind, ReportingLoader, RunContext, RunLog, RunStatus, StageError, StageOutput,
    StageResult, UnitPlan, WorkUnit,
};
use etl_jobs::sources::Source;
use etl_jobs::transform::NoReferenceData;
use etl_jobs::validate::{RuleValidator, ValidationRule};

const SCHEMA: &str = r#"
CREATE TABLE staged_prices (price_date TEXT, market TEXT, price INTEGER);
CREATE TABLE report_trail (id INTEGER PRIMARY KEY AUTOINCREMENT, step TEXT, d TEXT);
INSERT INTO flow_master VALUES
  ('prices', NULL, 2, 'INSERT INTO report_trail (step, d) VALUES (''second'', :d)'),
  ('prices', NULL, 1, 'INSERT INTO report_trail (step, d) VALUES (''first'', :d)'),
  ('prices_summary', NULL, 1, 'INSERT INTO report_trail (step, d) SELECT ''summary'', MAX(price_date) FROM staged_prices');
"#;

/// Two markets per day; fails on the configured date
#[derive(Clone, Default)]
struct DailyPrices {
    fail_on: Arc<Mutex<Option<NaiveDate>>>,
}

#[async_trait]
impl Extractor for DailyPrices {
    async fn extract(&self, _ctx: &RunContext<'_>, unit: &WorkUnit) -> StageResult<RecordSet> {
        let date = unit.date.expect("daily units carry a date");
        if *self.fail_on.lock().unwrap() == Some(date) {
            return Err(StageError::extraction("upstream returned HTTP 503"));
        }
        let rows = vec![
            vec![Value::Date(date), Value::from("Azadpur"), Value::Integer(1200)],
            vec![Value::Date(date), Value::from("Lasalgaon"), Value::Integer(900)],
        ];
        Ok(StageOutput::Data(
            RecordSet::from_rows(["price_date", "market", "price"], rows).unwrap(),
        ))
    }
}

#[derive(Deserialize)]
struct Flow {
    steps: Vec<FlowStep>,
}

fn flow_steps() -> Vec<FlowStep> {
    toml::from_str::<Flow>(
        r#"
[[steps]]
data_source = "prices"
scope = "per_unit"
sequence = [2, 1]
params = { d = "unit_date" }

[[steps]]
data_source = "prices_summary"
sequence = [1]
"#,
    )
    .unwrap()
    .steps
}

fn prices_source(extractor: DailyPrices) -> Source {
    Source::builder("prices")
        .display_name("Prices")
        .units(UnitPlan::Daily {
            watermark_column: "price_date".to_string(),
            lag: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        })
        .watermark_table("staged_prices")
        .extractor(extractor)
        .staging_loader(TableStagingLoader::new(
            StagingTarget {
                table: "staged_prices".to_string(),
                mode: LoadMode::Append,
                key: Vec::new(),
            },
            30_000,
        ))
        .reporting_loader(FlowReportingLoader::new(flow_steps(), Harness::flow_table()))
        .build()
}

#[tokio::test]
async fn test_failed_unit_keeps_prefix_and_next_run_resumes() {
    let harness = Harness::new(SCHEMA).await;
    let runner = harness.runner(ReferenceConfig::default());
    let extractor = DailyPrices::default();
    let source = prices_source(extractor.clone());

    // Units are 2024-01-01 ..= 2024-01-05; the third one fails
    *extractor.fail_on.lock().unwrap() = NaiveDate::from_ymd_opt(2024, 1, 3);
    let outcome = runner.run(&source, ENV, None).await;
    assert!(!outcome.success);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Extraction));
    assert!(outcome.message.contains("[2024-01-03]"), "{}", outcome.message);
    assert!(matches!(
        &outcome.status,
        RunStatus::Failed { unit: Some(unit), .. } if unit == "2024-01-03"
    ));

    assert_eq!(
        harness
            .column("SELECT DISTINCT price_date AS v FROM staged_prices ORDER BY price_date")
            .await,
        vec!["2024-01-01", "2024-01-02"]
    );
    assert_eq!(
        harness.column("SELECT step || ' ' || d AS v FROM report_trail ORDER BY id").await,
        vec![
            "first 2024-01-01",
            "second 2024-01-01",
            "first 2024-01-02",
            "second 2024-01-02",
        ]
    );
    assert_eq!(harness.column("SELECT status AS v FROM etl_logs").await, vec!["Fail"]);
    assert!(harness.log_dir().join("pricesstagingetl.log").exists());

    // Upstream recovers: only the missing days are loaded
    *extractor.fail_on.lock().unwrap() = None;
    let outcome = runner.run(&source, ENV, None).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.status, RunStatus::Loaded { units: 3, rows: 6 });
    assert_eq!(harness.count("staged_prices").await, 10);
    assert_eq!(
        harness
            .column("SELECT DISTINCT price_date AS v FROM staged_prices ORDER BY price_date")
            .await,
        vec!["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"]
    );
    let trail = harness.column("SELECT step || ' ' || d AS v FROM report_trail ORDER BY id").await;
    assert_eq!(trail.len(), 11);
    assert_eq!(trail[4], "first 2024-01-03");
    assert_eq!(trail[10], "summary 2024-01-05");
    assert!(!harness.log_dir().join("pricesstagingetl.log").exists());

    // Nothing new until tomorrow
    let outcome = runner.run(&source, ENV, None).await;
    assert!(outcome.success);
    assert_eq!(outcome.status, RunStatus::NoNewData);
    assert_eq!(harness.count("staged_prices").await, 10);
    assert_eq!(harness.count("report_trail").await, 11);

    assert_eq!(
        harness.column("SELECT status AS v FROM etl_logs").await,
        vec!["Fail", "Success", "Success"]
    );
    assert_eq!(
        harness.outbox.subjects(),
        vec![
            "CRITICAL : Staging Prices ETL job status",
            "INFO : Staging Prices ETL job status",
            "INFO : Staging Prices ETL job status",
        ]
    );
}

const DEPENDENT_FLOW: &str = r#"
CREATE TABLE staged_sales (market TEXT, qty INTEGER);
INSERT INTO staged_sales VALUES ('Azadpur', 5), ('Azadpur', 7), ('Lasalgaon', 3);
CREATE TABLE sales_detail (market TEXT, qty INTEGER);
CREATE TABLE sales_summary (market TEXT, total INTEGER);
INSERT INTO flow_master VALUES
  ('sales', NULL, 2, 'INSERT INTO sales_summary SELECT market, SUM(qty) FROM sales_detail GROUP BY market'),
  ('sales', NULL, 1, 'INSERT INTO sales_detail SELECT market, qty FROM staged_sales');
"#;

#[tokio::test]
async fn test_reporting_order_changes_the_result() {
    let table = Harness::flow_table();

    // Ascending order through the loader: the summary sees the detail rows
    let ordered = Harness::new(DEPENDENT_FLOW).await;
    let db = ordered.connect().await;
    let log = RunLog::in_memory("sales", ENV, chrono_tz::Asia::Kolkata);
    let ctx = RunContext {
        source: "sales",
        environment: ENV,
        run_date: NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(),
        db: &db,
        log: &log,
        reference: &NoReferenceData,
    };
    let steps = vec![FlowStep {
        data_source: "sales".to_string(),
        update_mode: None,
        sequence: vec![2, 1],
        scope: FlowScope::PerRun,
        params: Default::default(),
        for_each: Vec::new(),
        procedures: Vec::new(),
    }];
    let executed = FlowReportingLoader::new(steps, table.clone())
        .load_reporting(&ctx, FlowScope::PerRun, None)
        .await
        .unwrap();
    assert_eq!(executed, 2);
    db.close().await.unwrap();

    // The same statements replayed in reverse on a fresh schema
    let reversed = Harness::new(DEPENDENT_FLOW).await;
    let db = reversed.connect().await;
    let repo = FlowRepository::new(&db, &table);
    for sequence in [2, 1] {
        repo.execute_sequence("sales", None, sequence, &SqlParams::new())
            .await
            .unwrap();
    }
    db.close().await.unwrap();

    assert_eq!(ordered.count("sales_detail").await, 3);
    assert_eq!(reversed.count("sales_detail").await, 3);
    assert_eq!(
        ordered
            .column("SELECT market || ' ' || total AS v FROM sales_summary ORDER BY market")
            .await,
        vec!["Azadpur 12", "Lasalgaon 3"]
    );
    assert_eq!(reversed.count("sales_summary").await, 0);
}

#[tokio::test]
async fn test_audit_row_carries_run_log() {
    let harness = Harness::new(SCHEMA).await;
    let runner = harness.runner(ReferenceConfig::default());
    let source = prices_source(DailyPrices::default());

    let outcome = runner.run(&source, ENV, None).await;
    assert!(outcome.success, "{}", outcome.message);

    let logs = harness.column("SELECT log AS v FROM etl_logs").await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains(" - INFO - prices - "));
    assert!(logs[0].contains("Planned 5 units: 2024-01-01 .. 2024-01-05"));
    assert!(logs[0].contains("Execution time:"));
    assert_eq!(
        harness.column("SELECT run_date AS v FROM etl_logs").await,
        vec!["2024-01-06"]
    );
}

#[tokio::test]
async fn test_validation_failure_writes_nothing() {
    let harness = Harness::new(SCHEMA).await;
    let runner = harness.runner(ReferenceConfig::default());
    let source = Source::builder("prices")
        .display_name("Prices")
        .extractor(DailyPricesForRunDate)
        .validator(RuleValidator::new(vec![
            ValidationRule::RequiredColumns {
                columns: vec!["price_date".to_string(), "state".to_string()],
            },
            ValidationRule::NotNull {
                columns: vec!["price".to_string()],
            },
        ]))
        .staging_loader(TableStagingLoader::new(
            StagingTarget {
                table: "staged_prices".to_string(),
                mode: LoadMode::Append,
                key: Vec::new(),
            },
            30_000,
        ))
        .reporting_loader(FlowReportingLoader::new(flow_steps(), Harness::flow_table()))
        .build();

    let outcome = runner.run(&source, ENV, None).await;
    assert!(!outcome.success);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Validation));
    assert!(outcome.message.contains("missing columns: state"), "{}", outcome.message);
    assert!(
        outcome.message.contains("column 'price' has 1 null values"),
        "{}",
        outcome.message
    );

    assert_eq!(harness.count("staged_prices").await, 0);
    assert_eq!(harness.count("report_trail").await, 0);
    assert_eq!(harness.column("SELECT status AS v FROM etl_logs").await, vec!["Fail"]);
}

/// Single-unit extractor with a null price and no `state` column
struct DailyPricesForRunDate;

#[async_trait]
impl Extractor for DailyPricesForRunDate {
    async fn extract(&self, ctx: &RunContext<'_>, _unit: &WorkUnit) -> StageResult<RecordSet> {
        Ok(StageOutput::Data(
            RecordSet::from_rows(
                ["price_date", "market", "price"],
                vec![vec![Value::Date(ctx.run_date), Value::from("Azadpur"), Value::Null]],
            )
            .unwrap(),
        ))
    }
}

#[tokio::test]
async fn test_unknown_environment_is_infrastructure_failure() {
    let harness = Harness::new(SCHEMA).await;
    let runner = harness.runner(ReferenceConfig::default());
    let source = prices_source(DailyPrices::default());

    let outcomes = runner
        .run_environments(&source, &[ENV.to_string(), "production".to_string()], None)
        .await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].1.success);
    assert_eq!(outcomes[1].1.failure_kind(), Some(FailureKind::Infrastructure));
    assert_eq!(harness.column("SELECT status AS v FROM etl_logs").await, vec!["Success"]);
    assert_eq!(harness.outbox.subjects().len(), 2);
}
