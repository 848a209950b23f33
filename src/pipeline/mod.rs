//! ETL pipeline: stage traits, unit planning and the runner
//!
//! Control flow for one environment invocation:
//!
//! ```text
//! connect -> plan units -> for each unit:
//!     extract -> validate -> transform -> load staging -> per-unit reporting
//! -> per-run reporting -> audit row -> close -> notify
//! ```

pub mod context;
pub mod error;
pub mod outcome;
pub mod run_log;
pub mod runner;
pub mod traits;
pub mod units;

pub use context::{RunContext, WorkUnit};
pub use error::{FailureKind, StageError, StageOutput, StageResult, StageResultExt};
pub use outcome::{RunOutcome, RunRecord, RunStatus};
pub use run_log::RunLog;
pub use runner::{PipelineRunner, RunnerSettings};
pub use traits::{
    ConnectionProvider, Extractor, JobStatusRecorder, ReportingLoader, StagingLoader, Transformer,
    Validator,
};
pub use units::UnitPlan;
