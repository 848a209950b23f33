//! Staging table access: watermark reads and chunked bulk inserts

use chrono::NaiveDate;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseTransaction, Statement, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Database, abort_transaction};
use super::sql::{Binder, cast_text, quote_identifier, quote_table};
use crate::dataset::RecordSet;
use crate::errors::{AppResult, RepositoryError};
use crate::utils::time::parse_loose_date;

/// How rows reach the staging table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    #[default]
    Append,
    /// Insert, replacing non-key columns of rows whose natural key already exists
    Upsert,
}

pub struct StagingRepository<'a> {
    db: &'a Database,
}

impl<'a> StagingRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Latest date loaded into `table.column`, or `None` for an empty table
    pub async fn max_loaded_date(&self, table: &str, column: &str) -> AppResult<Option<NaiveDate>> {
        let backend = self.db.backend();
        let column_sql = quote_identifier(backend, column)?;
        let sql = format!(
            "SELECT {} AS max_value FROM {}",
            cast_text(backend, &format!("MAX({column_sql})")),
            quote_table(backend, table)?
        );

        let row = self
            .db
            .connection()
            .query_one(Statement::from_string(backend, sql.clone()))
            .await?;
        let raw: Option<String> = match row {
            Some(row) => row.try_get("", "max_value")?,
            None => None,
        };

        match raw {
            None => Ok(None),
            Some(text) => parse_loose_date(&text).map(Some).ok_or_else(|| {
                RepositoryError::query_failed(
                    sql,
                    format!("watermark value '{text}' in {table}.{column} is not a date"),
                )
                .into()
            }),
        }
    }

    pub async fn count(&self, table: &str) -> AppResult<u64> {
        let backend = self.db.backend();
        let sql = format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            quote_table(backend, table)?
        );
        let row = self
            .db
            .connection()
            .query_one(Statement::from_string(backend, sql))
            .await?;
        let count: i64 = match row {
            Some(row) => row.try_get("", "row_count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    /// Insert every row of `data` inside one transaction.
    ///
    /// Rows go out in multi-row statements of at most `max_bind_params`
    /// values. The transaction commits once all chunks succeed; any error
    /// rolls the whole batch back.
    pub async fn insert(
        &self,
        table: &str,
        data: &RecordSet,
        mode: LoadMode,
        key: &[String],
        max_bind_params: usize,
    ) -> AppResult<u64> {
        if data.is_empty() || data.width() == 0 {
            return Ok(0);
        }

        let backend = self.db.backend();
        let table_sql = quote_table(backend, table)?;
        let columns_sql = data
            .columns()
            .iter()
            .map(|c| quote_identifier(backend, c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let conflict_sql = match mode {
            LoadMode::Append => String::new(),
            LoadMode::Upsert => upsert_clause(backend, data.columns(), key)?,
        };

        let rows_per_chunk = (max_bind_params / data.width()).max(1);
        let txn = self.db.connection().begin().await?;
        let statement_head = format!("INSERT INTO {table_sql} ({columns_sql}) VALUES ");

        match insert_chunks(&txn, backend, &statement_head, &conflict_sql, data, rows_per_chunk).await {
            Ok(inserted) => {
                txn.commit().await?;
                debug!("Staged {} rows into {}", inserted, table);
                Ok(inserted)
            }
            Err(e) => abort_transaction(txn, e).await,
        }
    }
}

async fn insert_chunks(
    txn: &DatabaseTransaction,
    backend: DatabaseBackend,
    statement_head: &str,
    conflict_sql: &str,
    data: &RecordSet,
    rows_per_chunk: usize,
) -> AppResult<u64> {
    let mut inserted = 0u64;
    for chunk in data.rows().chunks(rows_per_chunk) {
        let mut binder = Binder::new(backend);
        let mut tuples = Vec::with_capacity(chunk.len());
        for row in chunk {
            let placeholders: Vec<String> = row.iter().map(|v| binder.bind(v)).collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }
        let sql = format!("{statement_head}{}{conflict_sql}", tuples.join(", "));
        txn.execute(Statement::from_sql_and_values(
            backend,
            sql,
            binder.into_values(),
        ))
        .await?;
        inserted += chunk.len() as u64;
    }
    Ok(inserted)
}

fn upsert_clause(backend: DatabaseBackend, columns: &[String], key: &[String]) -> AppResult<String> {
    if key.is_empty() {
        return Err(RepositoryError::query_failed("upsert", "no key columns configured").into());
    }
    for k in key {
        if !columns.contains(k) {
            return Err(RepositoryError::query_failed(
                "upsert",
                format!("key column '{k}' is not in the data"),
            )
            .into());
        }
    }

    let updates: Vec<&String> = columns.iter().filter(|c| !key.contains(c)).collect();
    let clause = match backend {
        DatabaseBackend::MySql => {
            let sets = if updates.is_empty() {
                let k = quote_identifier(backend, &key[0])?;
                vec![format!("{k} = {k}")]
            } else {
                updates
                    .iter()
                    .map(|c| {
                        quote_identifier(backend, c).map(|q| format!("{q} = VALUES({q})"))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            };
            format!(" ON DUPLICATE KEY UPDATE {}", sets.join(", "))
        }
        _ => {
            let key_sql = key
                .iter()
                .map(|k| quote_identifier(backend, k))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            if updates.is_empty() {
                format!(" ON CONFLICT ({key_sql}) DO NOTHING")
            } else {
                let sets = updates
                    .iter()
                    .map(|c| {
                        quote_identifier(backend, c).map(|q| format!("{q} = excluded.{q}"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                format!(" ON CONFLICT ({key_sql}) DO UPDATE SET {}", sets.join(", "))
            }
        }
    };
    Ok(clause)
}
