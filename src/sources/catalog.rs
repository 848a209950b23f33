//! Source catalog: configured sources wired to their stage implementations

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::scrape::{BrowserFactory, StaticPageFactory};
use super::{ApiExtractor, ExtractConfig, FileExtractor, NoExtract, ScrapeExtractor, http_client};
use crate::config::{Config, FlowTableConfig, SourceConfig};
use crate::errors::AppResult;
use crate::load::{FlowReportingLoader, TableStagingLoader};
use crate::pipeline::units::UnitPlan;
use crate::pipeline::{Extractor, ReportingLoader, StagingLoader, Transformer, Validator};
use crate::transform::StepTransformer;
use crate::validate::RuleValidator;

/// One runnable source: identity, unit plan and one implementation per stage
pub struct Source {
    pub name: String,
    pub display_name: String,
    pub job_name: String,
    pub units: UnitPlan,
    /// Staging table read for the date watermark
    pub watermark_table: Option<String>,
    /// Upload directory for file sources
    pub uploads: Option<PathBuf>,
    pub extractor: Box<dyn Extractor>,
    pub validator: Box<dyn Validator>,
    pub transformer: Box<dyn Transformer>,
    pub staging: Option<Box<dyn StagingLoader>>,
    pub reporting: Box<dyn ReportingLoader>,
}

impl Source {
    pub fn builder(name: &str) -> SourceBuilder {
        SourceBuilder::new(name)
    }

    pub fn is_file_source(&self) -> bool {
        matches!(self.units, UnitPlan::File)
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("job_name", &self.job_name)
            .field("units", &self.units)
            .field("watermark_table", &self.watermark_table)
            .field("has_staging", &self.staging.is_some())
            .finish()
    }
}

pub struct SourceBuilder {
    name: String,
    display_name: Option<String>,
    job_name: Option<String>,
    units: UnitPlan,
    watermark_table: Option<String>,
    uploads: Option<PathBuf>,
    extractor: Option<Box<dyn Extractor>>,
    validator: Option<Box<dyn Validator>>,
    transformer: Option<Box<dyn Transformer>>,
    staging: Option<Box<dyn StagingLoader>>,
    reporting: Option<Box<dyn ReportingLoader>>,
}

impl SourceBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: None,
            job_name: None,
            units: UnitPlan::default(),
            watermark_table: None,
            uploads: None,
            extractor: None,
            validator: None,
            transformer: None,
            staging: None,
            reporting: None,
        }
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn job_name(mut self, name: &str) -> Self {
        self.job_name = Some(name.to_string());
        self
    }

    pub fn units(mut self, units: UnitPlan) -> Self {
        self.units = units;
        self
    }

    pub fn watermark_table(mut self, table: &str) -> Self {
        self.watermark_table = Some(table.to_string());
        self
    }

    pub fn uploads(mut self, dir: PathBuf) -> Self {
        self.uploads = Some(dir);
        self
    }

    pub fn extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformer = Some(Box::new(transformer));
        self
    }

    pub fn staging_loader(mut self, loader: impl StagingLoader + 'static) -> Self {
        self.staging = Some(Box::new(loader));
        self
    }

    pub fn reporting_loader(mut self, loader: impl ReportingLoader + 'static) -> Self {
        self.reporting = Some(Box::new(loader));
        self
    }

    pub fn build(self) -> Source {
        Source {
            display_name: self.display_name.unwrap_or_else(|| self.name.clone()),
            job_name: self.job_name.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            units: self.units,
            watermark_table: self.watermark_table,
            uploads: self.uploads,
            extractor: self.extractor.unwrap_or_else(|| Box::new(NoExtract)),
            validator: self
                .validator
                .unwrap_or_else(|| Box::new(RuleValidator::new(Vec::new()))),
            transformer: self
                .transformer
                .unwrap_or_else(|| Box::new(StepTransformer::new(Vec::new()))),
            staging: self.staging,
            reporting: self.reporting.unwrap_or_else(|| {
                Box::new(FlowReportingLoader::new(Vec::new(), FlowTableConfig::default()))
            }),
        }
    }
}

/// All configured sources, keyed by catalog name
#[derive(Debug, Default)]
pub struct SourceCatalog {
    sources: BTreeMap<String, Source>,
}

impl SourceCatalog {
    /// Build every `[sources.*]` entry; scrape sources use plain HTTP page fetches
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let client = http_client(&config.http)?;
        let browser: Arc<dyn BrowserFactory> = Arc::new(StaticPageFactory::new(client));
        Self::with_browser(config, browser)
    }

    /// Build every `[sources.*]` entry with a caller-supplied browser for scrape sources
    pub fn with_browser(config: &Config, browser: Arc<dyn BrowserFactory>) -> AppResult<Self> {
        let client = http_client(&config.http)?;
        let mut sources = BTreeMap::new();
        for (name, entry) in &config.sources {
            let source = build_source(name, entry, config, &client, &browser);
            debug!(
                "Registered source {} ({} extractor, {:?} units)",
                name,
                entry.extract.kind(),
                source.units
            );
            sources.insert(name.clone(), source);
        }
        Ok(Self { sources })
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn build_source(
    name: &str,
    entry: &SourceConfig,
    config: &Config,
    client: &reqwest::Client,
    browser: &Arc<dyn BrowserFactory>,
) -> Source {
    let mut builder = Source::builder(name)
        .display_name(entry.display_name(name))
        .job_name(entry.job_name(name))
        .units(entry.units.clone())
        .validator(RuleValidator::new(entry.validate.clone()))
        .transformer(StepTransformer::new(entry.transform.clone()))
        .reporting_loader(FlowReportingLoader::new(
            entry.reporting.clone(),
            config.control.flow.clone(),
        ));

    builder = match &entry.extract {
        ExtractConfig::None => builder,
        ExtractConfig::Api(api) => builder.extractor(ApiExtractor::new(api.clone(), client.clone())),
        ExtractConfig::Scrape(scrape) => {
            builder.extractor(ScrapeExtractor::new(scrape.clone(), browser.clone()))
        }
        ExtractConfig::File(file) => builder.extractor(FileExtractor::new(file.clone())),
    };

    if let Some(staging) = &entry.staging {
        builder = builder
            .watermark_table(&staging.table)
            .staging_loader(TableStagingLoader::new(
                staging.clone(),
                config.staging.max_bind_params,
            ));
    }
    if let Some(dir) = &entry.uploads {
        builder = builder.uploads(dir.clone());
    }
    builder.build()
}
