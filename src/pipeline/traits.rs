//! Stage traits
//!
//! A source is a bundle of one implementation per stage; the runner drives
//! them strictly in sequence for each unit of work.

use async_trait::async_trait;

use super::{RunContext, RunRecord, StageError, StageResult, WorkUnit};
use crate::database::Database;
use crate::dataset::RecordSet;
use crate::errors::AppResult;
use crate::load::FlowScope;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch the raw batch for one unit; `NoData` skips the unit
    async fn extract(&self, ctx: &RunContext<'_>, unit: &WorkUnit) -> StageResult<RecordSet>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, ctx: &RunContext<'_>, set: &RecordSet) -> Result<(), StageError>;
}

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, ctx: &RunContext<'_>, set: RecordSet) -> Result<RecordSet, StageError>;
}

#[async_trait]
pub trait StagingLoader: Send + Sync {
    /// Write the batch in one committed transaction; returns rows written
    async fn load_staging(&self, ctx: &RunContext<'_>, set: &RecordSet) -> Result<u64, StageError>;
}

#[async_trait]
pub trait ReportingLoader: Send + Sync {
    /// Run the flow statements registered for `scope`; returns statements executed
    async fn load_reporting(
        &self,
        ctx: &RunContext<'_>,
        scope: FlowScope,
        unit: Option<&WorkUnit>,
    ) -> Result<usize, StageError>;
}

#[async_trait]
pub trait JobStatusRecorder: Send + Sync {
    async fn record(&self, db: &Database, record: &RunRecord) -> AppResult<()>;
}

/// Opens a fresh connection handle for one environment invocation
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self, environment: &str) -> AppResult<Database>;
}
