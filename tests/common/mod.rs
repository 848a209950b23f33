//! Shared fixtures for runner integration tests: a temp-file SQLite database
//! that outlives each invocation's connection, and a recording notifier.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sea_orm::{ConnectionTrait, Statement};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use etl_jobs::config::{
    AuditTableConfig, DatabaseConfig, EnvironmentConfig, FlowTableConfig, ReferenceConfig,
};
use etl_jobs::database::{Database, DbJobStatusRecorder, EnvironmentConnections};
use etl_jobs::errors::AppResult;
use etl_jobs::notify::{Notification, Notifier};
use etl_jobs::pipeline::{PipelineRunner, RunnerSettings};
use etl_jobs::utils::FixedClock;

pub const ENV: &str = "staging";

pub const CONTROL_TABLES: &str = r#"
CREATE TABLE etl_logs (etl_job TEXT, run_date TEXT, start_timestamp TEXT, end_timestamp TEXT, status TEXT, log TEXT);
CREATE TABLE flow_master ("DataSource" TEXT, "UpdateMode" TEXT, "SeqNo" INTEGER, "QueryText" TEXT);
"#;

#[derive(Default)]
pub struct Outbox(pub Mutex<Vec<Notification>>);

#[async_trait]
impl Notifier for Outbox {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        self.0.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

impl Outbox {
    pub fn subjects(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|n| n.subject.clone()).collect()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub url: String,
    pub outbox: Arc<Outbox>,
}

impl Harness {
    pub async fn new(schema: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("etl.db").display());
        let harness = Self {
            dir,
            url,
            outbox: Arc::new(Outbox::default()),
        };
        let db = harness.connect().await;
        db.connection()
            .execute_unprepared(&format!("{CONTROL_TABLES}{schema}"))
            .await
            .unwrap();
        db.close().await.unwrap();
        harness
    }

    pub async fn connect(&self) -> Database {
        Database::connect(&DatabaseConfig::new(self.url.clone()))
            .await
            .unwrap()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    pub fn flow_table() -> FlowTableConfig {
        FlowTableConfig {
            table: "flow_master".to_string(),
            ..FlowTableConfig::default()
        }
    }

    /// Runner whose clock reads 2024-01-06 12:00 in Asia/Kolkata
    pub fn runner(&self, reference: ReferenceConfig) -> PipelineRunner {
        let mut environments = BTreeMap::new();
        environments.insert(
            ENV.to_string(),
            EnvironmentConfig {
                display_name: None,
                database: DatabaseConfig::new(self.url.clone()),
            },
        );
        let settings = RunnerSettings {
            log_dir: self.log_dir(),
            reference,
            ..RunnerSettings::default()
        };
        PipelineRunner::new(
            Arc::new(EnvironmentConnections::new(environments)),
            Arc::new(DbJobStatusRecorder::new(AuditTableConfig {
                table: "etl_logs".to_string(),
            })),
            self.outbox.clone(),
            settings,
        )
        .with_clock(Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 1, 6, 6, 30, 0).unwrap(),
        )))
    }

    /// First column of every row, rendered as text (NULL as an empty string)
    pub async fn column(&self, sql: &str) -> Vec<String> {
        let db = self.connect().await;
        let backend = db.backend();
        let rows = db
            .connection()
            .query_all(Statement::from_string(backend, sql.to_string()))
            .await
            .unwrap();
        let values = rows
            .iter()
            .map(|row| {
                row.try_get::<Option<String>>("", "v")
                    .unwrap()
                    .unwrap_or_default()
            })
            .collect();
        db.close().await.unwrap();
        values
    }

    pub async fn count(&self, table: &str) -> usize {
        let rows = self
            .column(&format!("SELECT CAST(COUNT(*) AS TEXT) AS v FROM {table}"))
            .await;
        rows[0].parse().unwrap()
    }
}
