//! Audit rows for every pipeline invocation

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, Statement};
use tracing::debug;

use super::Database;
use super::sql::{Binder, quote_table};
use crate::config::AuditTableConfig;
use crate::dataset::Value;
use crate::errors::AppResult;
use crate::pipeline::{JobStatusRecorder, RunRecord};

/// Writes one row per run into the audit table:
/// `(etl_job, run_date, start_timestamp, end_timestamp, status, log)`
pub struct DbJobStatusRecorder {
    table: AuditTableConfig,
}

impl DbJobStatusRecorder {
    pub fn new(table: AuditTableConfig) -> Self {
        Self { table }
    }
}

#[async_trait]
impl JobStatusRecorder for DbJobStatusRecorder {
    async fn record(&self, db: &Database, record: &RunRecord) -> AppResult<()> {
        let backend = db.backend();
        let mut binder = Binder::new(backend);
        let values = [
            Value::from(record.job_name.as_str()),
            Value::Date(record.run_date),
            Value::Timestamp(record.start.naive_local()),
            Value::Timestamp(record.end.naive_local()),
            Value::from(record.status_label()),
            Value::from(record.log_text.as_str()),
        ];
        let placeholders: Vec<String> = values.iter().map(|v| binder.bind(v)).collect();
        let sql = format!(
            "INSERT INTO {} (etl_job, run_date, start_timestamp, end_timestamp, status, log) VALUES ({})",
            quote_table(backend, &self.table.table)?,
            placeholders.join(", ")
        );

        db.connection()
            .execute(Statement::from_sql_and_values(backend, sql, binder.into_values()))
            .await?;
        debug!(
            "Recorded {} run of {} in {}",
            record.status_label(),
            record.job_name,
            self.table.table
        );
        Ok(())
    }
}
