//! Database-backed reference data (synonym lookups, exchange rates)

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{ConnectionTrait, Statement};

use super::Database;
use super::sql::{SqlParams, bind_named, cast_float, cast_text, quote_identifier, quote_table};
use crate::config::ReferenceConfig;
use crate::dataset::Value;
use crate::errors::{AppError, AppResult, RepositoryError};
use crate::transform::{ReferenceData, SynonymEntry};
use crate::utils::time::parse_loose_date;

/// Reads the configured lookup tables through the invocation's connection
pub struct DbReferenceData<'a> {
    db: &'a Database,
    config: &'a ReferenceConfig,
}

impl<'a> DbReferenceData<'a> {
    pub fn new(db: &'a Database, config: &'a ReferenceConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl ReferenceData for DbReferenceData<'_> {
    async fn synonyms(&self, lookup: &str) -> AppResult<Vec<SynonymEntry>> {
        let table = self.config.lookups.get(lookup).ok_or_else(|| {
            AppError::configuration(format!("unknown reference lookup '{lookup}'"))
        })?;
        let backend = self.db.backend();
        let mut params = SqlParams::new();
        let mut sql = format!(
            "SELECT {} AS canonical, {} AS synonyms FROM {}",
            cast_text(backend, &quote_identifier(backend, &table.canonical_column)?),
            quote_identifier(backend, &table.synonyms_column)?,
            quote_table(backend, &table.table)?
        );
        if let (Some(column), Some(value)) = (&table.filter_column, &table.filter_value) {
            sql.push_str(&format!(" WHERE {} = :filter_value", quote_identifier(backend, column)?));
            params.insert("filter_value".to_string(), Value::from(value.as_str()));
        }

        let (sql, values) = bind_named(backend, &sql, &params)?;
        let rows = self
            .db
            .connection()
            .query_all(Statement::from_sql_and_values(backend, sql, values))
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let canonical: Option<String> = row.try_get("", "canonical")?;
            let synonyms: Option<String> = row.try_get("", "synonyms")?;
            if let Some(canonical) = canonical.filter(|c| !c.trim().is_empty()) {
                entries.push(SynonymEntry::new(canonical.trim(), synonyms.as_deref().unwrap_or("")));
            }
        }
        Ok(entries)
    }

    async fn exchange_rates(&self, currency: &str) -> AppResult<Vec<(NaiveDate, f64)>> {
        let table = self.config.exchange_rates.as_ref().ok_or_else(|| {
            AppError::configuration("no [reference.exchange_rates] table configured")
        })?;
        let backend = self.db.backend();
        let date_sql = quote_identifier(backend, &table.date_column)?;
        let sql = format!(
            "SELECT {} AS rate_date, {} AS rate FROM {} WHERE {} = :currency ORDER BY {date_sql}",
            cast_text(backend, &date_sql),
            cast_float(backend, &quote_identifier(backend, &table.rate_column)?),
            quote_table(backend, &table.table)?,
            quote_identifier(backend, &table.currency_column)?,
        );
        let mut params = SqlParams::new();
        params.insert("currency".to_string(), Value::from(currency));

        let (sql_bound, values) = bind_named(backend, &sql, &params)?;
        let rows = self
            .db
            .connection()
            .query_all(Statement::from_sql_and_values(backend, sql_bound, values))
            .await?;

        let mut rates = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_date: Option<String> = row.try_get("", "rate_date")?;
            let rate: Option<f64> = row.try_get("", "rate")?;
            let (Some(raw_date), Some(rate)) = (raw_date, rate) else {
                continue;
            };
            let date = parse_loose_date(&raw_date).ok_or_else(|| {
                RepositoryError::query_failed(
                    sql.clone(),
                    format!("exchange rate date '{raw_date}' is not a date"),
                )
            })?;
            rates.push((date, rate));
        }
        Ok(rates)
    }
}
