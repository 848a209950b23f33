//! Upload-status table updates for user-uploaded files

use sea_orm::{ConnectionTrait, Statement};

use super::Database;
use super::sql::{Binder, quote_identifier, quote_table};
use crate::config::UploadStatusTableConfig;
use crate::dataset::Value;
use crate::errors::AppResult;

pub struct UploadStatusRepository<'a> {
    db: &'a Database,
    table: &'a UploadStatusTableConfig,
}

impl<'a> UploadStatusRepository<'a> {
    pub fn new(db: &'a Database, table: &'a UploadStatusTableConfig) -> Self {
        Self { db, table }
    }

    /// Set status and remarks for the row of `server_file`; returns rows updated
    pub async fn update(&self, server_file: &str, success: bool, remarks: &str) -> AppResult<u64> {
        let backend = self.db.backend();
        let mut binder = Binder::new(backend);
        let status = binder.bind(&Value::from(if success { "Success" } else { "Fail" }));
        let remarks = binder.bind(&Value::from(remarks));
        let file = binder.bind(&Value::from(server_file));

        let sql = format!(
            "UPDATE {} SET {} = {status}, {} = {remarks} WHERE {} = {file}",
            quote_table(backend, &self.table.table)?,
            quote_identifier(backend, &self.table.status_column)?,
            quote_identifier(backend, &self.table.remarks_column)?,
            quote_identifier(backend, &self.table.file_column)?,
        );
        let result = self
            .db
            .connection()
            .execute(Statement::from_sql_and_values(backend, sql, binder.into_values()))
            .await?;
        Ok(result.rows_affected())
    }
}
