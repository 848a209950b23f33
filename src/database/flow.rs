//! Flow definition table: parameterized reporting SQL keyed by data source and sequence

use sea_orm::{ConnectionTrait, Statement, TransactionTrait};
use tracing::debug;

use super::{Database, abort_transaction};
use super::sql::{SqlParams, bind_named, quote_identifier, quote_table};
use crate::config::FlowTableConfig;
use crate::dataset::Value;
use crate::errors::{AppResult, RepositoryError};

pub struct FlowRepository<'a> {
    db: &'a Database,
    table: &'a FlowTableConfig,
}

impl<'a> FlowRepository<'a> {
    pub fn new(db: &'a Database, table: &'a FlowTableConfig) -> Self {
        Self { db, table }
    }

    /// Fetch the SQL text registered for `(data_source, sequence)`
    pub async fn statement_text(
        &self,
        data_source: &str,
        update_mode: Option<&str>,
        sequence: i64,
    ) -> AppResult<String> {
        let backend = self.db.backend();
        let mut params = SqlParams::new();
        params.insert("data_source".to_string(), Value::from(data_source));
        params.insert("sequence".to_string(), Value::Integer(sequence));

        let mut sql = format!(
            "SELECT {query} AS query_text FROM {table} WHERE {ds} = :data_source AND {seq} = :sequence",
            query = quote_identifier(backend, &self.table.query_column)?,
            table = quote_table(backend, &self.table.table)?,
            ds = quote_identifier(backend, &self.table.data_source_column)?,
            seq = quote_identifier(backend, &self.table.sequence_column)?,
        );
        if let Some(mode) = update_mode {
            params.insert("update_mode".to_string(), Value::from(mode));
            sql.push_str(&format!(
                " AND {} = :update_mode",
                quote_identifier(backend, &self.table.update_mode_column)?
            ));
        }

        let (sql, values) = bind_named(backend, &sql, &params)?;
        let row = self
            .db
            .connection()
            .query_one(Statement::from_sql_and_values(backend, sql, values))
            .await?;

        let text: Option<String> = match row {
            Some(row) => row.try_get("", "query_text")?,
            None => None,
        };
        text.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
            RepositoryError::record_not_found(
                self.table.table.clone(),
                format!(
                    "{}/{}",
                    self.table.data_source_column, self.table.sequence_column
                ),
                format!("{data_source}/{sequence}"),
            )
            .into()
        })
    }

    /// Fetch and execute one flow statement in its own committed transaction
    pub async fn execute_sequence(
        &self,
        data_source: &str,
        update_mode: Option<&str>,
        sequence: i64,
        params: &SqlParams,
    ) -> AppResult<u64> {
        let text = self.statement_text(data_source, update_mode, sequence).await?;
        debug!("Executing flow statement {}/{}", data_source, sequence);
        self.execute_text(&text, params).await
    }

    /// `CALL` a stored procedure (optionally schema-qualified) without arguments
    pub async fn call_procedure(&self, procedure: &str) -> AppResult<u64> {
        let name = quote_table(self.db.backend(), procedure)?;
        self.execute_text(&format!("CALL {name}()"), &SqlParams::new())
            .await
    }

    async fn execute_text(&self, text: &str, params: &SqlParams) -> AppResult<u64> {
        let backend = self.db.backend();
        let (sql, values) = bind_named(backend, text, params)?;
        let txn = self.db.connection().begin().await?;
        match txn
            .execute(Statement::from_sql_and_values(backend, sql, values))
            .await
        {
            Ok(result) => {
                txn.commit().await?;
                Ok(result.rows_affected())
            }
            Err(e) => abort_transaction(txn, e.into()).await,
        }
    }
}
