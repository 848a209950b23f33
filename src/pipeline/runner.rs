//! Pipeline runner
//!
//! Drives one source through every stage for one environment at a time.
//! Every invocation gets its own connection handle and run log, writes one
//! audit row, and sends one notification, whatever the outcome. Units that
//! committed before a failure stay committed.

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::{
    ConnectionProvider, FailureKind, JobStatusRecorder, RunContext, RunLog, RunOutcome, RunRecord,
    RunStatus, StageError, StageOutput, StageResultExt, WorkUnit,
};
use crate::config::{Config, DEFAULT_LOG_DIR, ReferenceConfig, UploadStatusTableConfig};
use crate::database::{Database, DbReferenceData, StagingRepository, UploadStatusRepository};
use crate::errors::AppResult;
use crate::load::FlowScope;
use crate::notify::{Notification, Notifier, Severity};
use crate::sources::Source;
use crate::utils::time::elapsed_minutes;
use crate::utils::{Clock, SystemClock};

/// Runner-wide settings taken from `[general]`, `[control]` and `[reference]`
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub log_dir: PathBuf,
    pub keep_logs: bool,
    pub timezone: Tz,
    pub reference: ReferenceConfig,
    pub upload_status: Option<UploadStatusTableConfig>,
    /// Environment key -> name used in notification subjects
    pub environment_names: BTreeMap<String, String>,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self {
            log_dir: config.general.log_dir.clone(),
            keep_logs: config.general.keep_logs,
            timezone: config.timezone()?,
            reference: config.reference.clone(),
            upload_status: config.control.upload_status.clone(),
            environment_names: config
                .environments
                .iter()
                .map(|(key, env)| (key.clone(), env.display_name(key)))
                .collect(),
        })
    }

    fn environment_name(&self, key: &str) -> String {
        self.environment_names
            .get(key)
            .cloned()
            .unwrap_or_else(|| capitalize(key))
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            keep_logs: false,
            timezone: chrono_tz::Asia::Kolkata,
            reference: ReferenceConfig::default(),
            upload_status: None,
            environment_names: BTreeMap::new(),
        }
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Failure of one invocation, with the unit it happened in
struct RunFailure {
    error: StageError,
    unit: Option<String>,
}

impl RunFailure {
    fn at(unit: &WorkUnit) -> impl FnOnce(StageError) -> RunFailure + '_ {
        move |error| RunFailure {
            error: error.in_unit(&unit.label),
            unit: Some(unit.label.clone()),
        }
    }
}

impl From<StageError> for RunFailure {
    fn from(error: StageError) -> Self {
        Self { error, unit: None }
    }
}

pub struct PipelineRunner {
    connections: Arc<dyn ConnectionProvider>,
    recorder: Arc<dyn JobStatusRecorder>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
}

impl PipelineRunner {
    pub fn new(
        connections: Arc<dyn ConnectionProvider>,
        recorder: Arc<dyn JobStatusRecorder>,
        notifier: Arc<dyn Notifier>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            connections,
            recorder,
            notifier,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run `source` for each environment in turn; one outcome per environment
    pub async fn run_environments(
        &self,
        source: &Source,
        environments: &[String],
        file: Option<&Path>,
    ) -> Vec<(String, RunOutcome)> {
        let mut outcomes = Vec::with_capacity(environments.len());
        for environment in environments {
            let outcome = self.run(source, environment, file).await;
            outcomes.push((environment.clone(), outcome));
        }
        outcomes
    }

    /// Run `source` once against `environment`. Never fails; the outcome says how it went.
    pub async fn run(&self, source: &Source, environment: &str, file: Option<&Path>) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("etl_run", %run_id, source = %source.name, environment);
        self.run_once(source, environment, file, run_id)
            .instrument(span)
            .await
    }

    async fn run_once(
        &self,
        source: &Source,
        environment: &str,
        file: Option<&Path>,
        run_id: Uuid,
    ) -> RunOutcome {
        let tz = self.settings.timezone;
        let start = self.clock.now_in(tz);
        let run_date = start.date_naive();

        let log = match RunLog::create(&self.settings.log_dir, &source.name, environment, tz) {
            Ok(log) => log,
            Err(e) => {
                warn!(
                    "Cannot create run log in {}: {}, keeping it in memory",
                    self.settings.log_dir.display(),
                    e
                );
                RunLog::in_memory(&source.name, environment, tz)
            }
        };
        log.info(format!(
            "Starting {} ETL for {} (run date {}, run id {})",
            source.display_name,
            self.settings.environment_name(environment),
            run_date,
            run_id
        ));

        let db = match self.connections.connect(environment).await {
            Ok(db) => db,
            Err(e) => {
                let error = StageError::infrastructure(format!("connecting to {environment}: {e}"));
                log.error(error.to_string());
                let outcome = RunOutcome::failed(&error, None);
                log.close();
                self.notify(source, environment, &outcome, &log).await;
                return outcome;
            }
        };

        let outcome = self
            .run_with_connection(source, environment, file, &db, &log, run_date)
            .await;

        let end = self.clock.now_in(tz);
        self.finish(source, environment, file, &db, &log, &outcome, run_date, start, end)
            .await;

        if let Err(e) = db.close().await {
            warn!("Closing connection for {}/{} failed: {}", source.name, environment, e);
        }
        log.close();
        self.notify(source, environment, &outcome, &log).await;

        if outcome.success
            && !self.settings.keep_logs
            && let Err(e) = log.remove()
        {
            warn!("Failed to remove run log: {}", e);
        }
        outcome
    }

    async fn run_with_connection(
        &self,
        source: &Source,
        environment: &str,
        file: Option<&Path>,
        db: &Database,
        log: &RunLog,
        run_date: NaiveDate,
    ) -> RunOutcome {
        let reference = DbReferenceData::new(db, &self.settings.reference);
        let ctx = RunContext {
            source: &source.name,
            environment,
            run_date,
            db,
            log,
            reference: &reference,
        };

        let result = AssertUnwindSafe(self.execute(source, &ctx, file))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(status)) => {
                let outcome = match status {
                    RunStatus::Loaded { units, rows } => RunOutcome::loaded(units, rows),
                    _ => RunOutcome::no_new_data(format!("No new data for {}", source.display_name)),
                };
                log.info(&outcome.message);
                outcome
            }
            Ok(Err(failure)) => {
                log.error(failure.error.to_string());
                RunOutcome::failed(&failure.error, failure.unit)
            }
            Err(panic) => {
                let error = StageError::infrastructure(format!(
                    "stage panicked: {}",
                    panic_message(panic.as_ref())
                ));
                log.error(error.to_string());
                RunOutcome::failed(&error, None)
            }
        }
    }

    async fn execute(
        &self,
        source: &Source,
        ctx: &RunContext<'_>,
        file: Option<&Path>,
    ) -> Result<RunStatus, RunFailure> {
        let watermark = match (source.units.watermark_column(), source.watermark_table.as_deref()) {
            (Some(column), Some(table)) => StagingRepository::new(ctx.db)
                .max_loaded_date(table, column)
                .await
                .stage_context(FailureKind::Extraction, "reading staging watermark")?,
            _ => None,
        };
        if let Some(last) = watermark {
            ctx.log.info(format!("Last loaded date: {last}"));
        }

        let units = source.units.plan(watermark, ctx.run_date, file)?;
        if units.is_empty() {
            ctx.log.info("Nothing to load, data is up to date");
            return Ok(RunStatus::NoNewData);
        }
        ctx.log.info(format!(
            "Planned {} units: {} .. {}",
            units.len(),
            units[0].label,
            units[units.len() - 1].label
        ));

        let mut loaded_units = 0;
        let mut rows = 0;
        for unit in &units {
            let set = match source
                .extractor
                .extract(ctx, unit)
                .await
                .map_err(RunFailure::at(unit))?
            {
                StageOutput::Data(set) => set,
                StageOutput::NoData { reason } => {
                    ctx.log.info(format!("[{}] No data: {}", unit.label, reason));
                    continue;
                }
            };
            ctx.log
                .info(format!("[{}] Extracted {} rows", unit.label, set.len()));

            source
                .validator
                .validate(ctx, &set)
                .await
                .map_err(RunFailure::at(unit))?;
            let set = source
                .transformer
                .transform(ctx, set)
                .await
                .map_err(RunFailure::at(unit))?;

            rows += match &source.staging {
                Some(loader) => loader
                    .load_staging(ctx, &set)
                    .await
                    .map_err(RunFailure::at(unit))?,
                None => set.len() as u64,
            };
            source
                .reporting
                .load_reporting(ctx, FlowScope::PerUnit, Some(unit))
                .await
                .map_err(RunFailure::at(unit))?;
            loaded_units += 1;
            debug!("Unit {} of {} committed", unit.label, source.name);
        }

        if loaded_units == 0 {
            return Ok(RunStatus::NoNewData);
        }
        source
            .reporting
            .load_reporting(ctx, FlowScope::PerRun, None)
            .await?;
        Ok(RunStatus::Loaded {
            units: loaded_units,
            rows,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        source: &Source,
        environment: &str,
        file: Option<&Path>,
        db: &Database,
        log: &RunLog,
        outcome: &RunOutcome,
        run_date: NaiveDate,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) {
        log.info(format!(
            "Execution time: {:.2} minutes",
            elapsed_minutes(&start, &end)
        ));

        if let (Some(file), Some(table)) = (file, &self.settings.upload_status) {
            let server_file = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let remarks = if outcome.success { "Loaded" } else { outcome.message.as_str() };
            match UploadStatusRepository::new(db, table)
                .update(&server_file, outcome.success, remarks)
                .await
            {
                Ok(0) => log.warn(format!("No upload-status row for {server_file}")),
                Ok(_) => {}
                Err(e) => log.warn(format!("Upload-status update failed: {e}")),
            }
        }

        let record = RunRecord {
            job_name: source.job_name.clone(),
            environment: environment.to_string(),
            run_date,
            start: start.fixed_offset(),
            end: end.fixed_offset(),
            success: outcome.success,
            log_text: log.text(),
        };
        if let Err(e) = self.recorder.record(db, &record).await {
            log.error(format!("Recording job status failed: {e}"));
            error!(
                "Audit row for {}/{} was not written: {}",
                source.name, environment, e
            );
        }
    }

    async fn notify(&self, source: &Source, environment: &str, outcome: &RunOutcome, log: &RunLog) {
        let env_name = self.settings.environment_name(environment);
        let severity = if outcome.success {
            Severity::Info
        } else {
            Severity::Critical
        };
        let subject = format!(
            "{} : {} {} ETL job status",
            severity.label(),
            env_name,
            source.display_name
        );
        let body = if outcome.success {
            format!(
                "{} ETL job on {} completed successfully.\n\n{}\n\nThe run log is attached.",
                source.display_name, env_name, outcome.message
            )
        } else {
            format!(
                "{} ETL job on {} failed.\n\n{}\n\nSee the attached log for details.",
                source.display_name, env_name, outcome.message
            )
        };
        let notification = Notification {
            severity,
            subject,
            body,
            attachment: log.path().map(Path::to_path_buf),
        };
        match self.notifier.notify(&notification).await {
            Ok(()) => info!("Sent {} notification for {}/{}", severity.label(), source.name, environment),
            Err(e) => error!(
                "Notification for {}/{} failed: {}",
                source.name, environment, e
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
