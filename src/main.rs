use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etl_jobs::{
    config::{Config, DEFAULT_CONFIG_FILE},
    database::{DbJobStatusRecorder, EnvironmentConnections},
    notify,
    pipeline::{PipelineRunner, RunOutcome, RunnerSettings},
    sources::{Source, SourceCatalog},
    uploads::{self, UploadDirs},
};

#[derive(Parser)]
#[command(name = "etl-jobs")]
#[command(version)]
#[command(about = "Config-driven ETL jobs: extract, stage, report and notify per environment")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one source against each environment
    Run {
        source: String,
        /// Environment to run; repeatable. Defaults to `general.run_order`
        #[arg(short, long = "env", value_name = "NAME")]
        envs: Vec<String>,
    },
    /// Run a file source on one uploaded file
    RunFile {
        source: String,
        path: PathBuf,
        #[arg(short, long = "env", value_name = "NAME")]
        envs: Vec<String>,
    },
    /// Process every file waiting in the upload directories
    ScanUploads {
        #[arg(short, long = "env", value_name = "NAME")]
        envs: Vec<String>,
    },
    /// List configured sources
    ListSources,
    /// Validate the configuration and print it with secrets masked
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::CheckConfig => {
            println!("{}", config.to_redacted_toml()?);
            return Ok(());
        }
        Command::ListSources => {
            for (name, source) in &config.sources {
                println!(
                    "{:<20} {:<8} {}",
                    name,
                    source.extract.kind(),
                    source.display_name(name)
                );
            }
            return Ok(());
        }
        _ => {}
    }

    let catalog = SourceCatalog::from_config(&config)?;
    let settings = RunnerSettings::from_config(&config)?;
    let timezone = settings.timezone;
    let runner = PipelineRunner::new(
        Arc::new(EnvironmentConnections::new(config.environments.clone())),
        Arc::new(DbJobStatusRecorder::new(config.control.audit.clone())),
        notify::from_config(&config)?,
        settings,
    );

    match cli.command {
        Command::Run { source, envs } => {
            let source = lookup(&catalog, &source)?;
            let envs = environments(&config, envs)?;
            let outcomes = runner.run_environments(source, &envs, None).await;
            report(&source.name, &outcomes);
        }
        Command::RunFile { source, path, envs } => {
            let source = lookup(&catalog, &source)?;
            if !source.is_file_source() {
                bail!("source '{}' does not take uploaded files", source.name);
            }
            if !path.is_file() {
                bail!("{} is not a file", path.display());
            }
            let envs = environments(&config, envs)?;
            match &source.uploads {
                Some(root) => {
                    let dirs = UploadDirs::new(root, timezone);
                    let run = uploads::run_upload(&runner, source, &envs, &dirs, &path).await;
                    report(&source.name, &run.outcomes);
                }
                None => {
                    let outcomes = runner.run_environments(source, &envs, Some(&path)).await;
                    report(&source.name, &outcomes);
                }
            }
        }
        Command::ScanUploads { envs } => {
            let envs = environments(&config, envs)?;
            for source in catalog.iter().filter(|s| s.is_file_source()) {
                for run in uploads::scan_source(&runner, source, &envs, timezone).await? {
                    report(&source.name, &run.outcomes);
                    if run.moved_to.is_none() {
                        warn!("{} was left in place", run.file.display());
                    }
                }
            }
        }
        Command::ListSources | Command::CheckConfig => {}
    }

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("etl_jobs={level}").into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn lookup<'a>(catalog: &'a SourceCatalog, name: &str) -> Result<&'a Source> {
    match catalog.get(name) {
        Some(source) => Ok(source),
        None => bail!(
            "unknown source '{}' (configured: {})",
            name,
            catalog.names().collect::<Vec<_>>().join(", ")
        ),
    }
}

fn environments(config: &Config, requested: Vec<String>) -> Result<Vec<String>> {
    let envs = if requested.is_empty() {
        config.default_environments()
    } else {
        requested
    };
    if envs.is_empty() {
        bail!("no environments configured");
    }
    for env in &envs {
        config.environment(env)?;
    }
    Ok(envs)
}

fn report(source: &str, outcomes: &[(String, RunOutcome)]) {
    for (env, outcome) in outcomes {
        if outcome.success {
            info!("{}/{}: {}", source, env, outcome.message);
        } else {
            warn!("{}/{}: {}", source, env, outcome.message);
        }
    }
}
