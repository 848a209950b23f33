//! Page-scraping extractor
//!
//! A [`BrowserSession`] is driven through the configured actions, then the
//! target table is read from each result page. Headless browsers plug in by
//! implementing [`BrowserFactory`]; [`StaticPageFactory`] covers pages that
//! render their tables server-side.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::html::{TableSelector, find_table, parse_table};
use super::ensure_success;
use super::template::render;
use crate::config::{DEFAULT_DATE_FORMAT, DEFAULT_MAX_PAGES};
use crate::dataset::RecordSet;
use crate::errors::{AppResult, SourceError};
use crate::pipeline::{Extractor, RunContext, StageError, StageOutput, StageResult, WorkUnit};
use crate::utils::url::UrlUtils;

/// One browser tab
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> AppResult<()>;

    /// Choose `value` in the `<select>` matched by `selector`
    async fn select(&mut self, selector: &str, value: &str) -> AppResult<()>;

    async fn click(&mut self, selector: &str) -> AppResult<()>;

    /// Current page HTML
    async fn page_source(&mut self) -> AppResult<String>;

    async fn close(&mut self) -> AppResult<()>;
}

#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn open(&self) -> AppResult<Box<dyn BrowserSession>>;
}

/// Fetches pages with a plain GET; forms and clicks are not available
pub struct StaticPageFactory {
    client: Client,
}

impl StaticPageFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrowserFactory for StaticPageFactory {
    async fn open(&self) -> AppResult<Box<dyn BrowserSession>> {
        Ok(Box::new(StaticPageSession {
            client: self.client.clone(),
            page: None,
        }))
    }
}

pub struct StaticPageSession {
    client: Client,
    page: Option<String>,
}

#[async_trait]
impl BrowserSession for StaticPageSession {
    async fn goto(&mut self, url: &str) -> AppResult<()> {
        let response = self.client.get(url).send().await?;
        ensure_success(response.status(), url)?;
        self.page = Some(response.text().await?);
        Ok(())
    }

    async fn select(&mut self, _selector: &str, _value: &str) -> AppResult<()> {
        Err(SourceError::unsupported("select", "static page").into())
    }

    async fn click(&mut self, _selector: &str) -> AppResult<()> {
        Err(SourceError::unsupported("click", "static page").into())
    }

    async fn page_source(&mut self) -> AppResult<String> {
        self.page
            .clone()
            .ok_or_else(|| SourceError::parse("static page", "no page loaded").into())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.page = None;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    Select { selector: String, value: String },
    Click { selector: String },
    Wait { millis: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub url: String,
    #[serde(default)]
    pub actions: Vec<BrowserAction>,
    #[serde(default)]
    pub table: TableSelector,
    /// Selector clicked to reach the next result page
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Page text meaning the unit has no data, e.g. `No Data Found`
    #[serde(default)]
    pub no_data_text: Option<String>,
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

pub struct ScrapeExtractor {
    config: ScrapeConfig,
    browser: Arc<dyn BrowserFactory>,
}

impl ScrapeExtractor {
    pub fn new(config: ScrapeConfig, browser: Arc<dyn BrowserFactory>) -> Self {
        Self { config, browser }
    }

    async fn scrape(
        &self,
        session: &mut dyn BrowserSession,
        ctx: &RunContext<'_>,
        unit: &WorkUnit,
    ) -> AppResult<StageOutput<RecordSet>> {
        let fill = |template: &str| render(template, unit, ctx.run_date, &self.config.date_format);
        let url = fill(&self.config.url);
        ctx.log.info(format!(
            "[{}] Opening {}",
            unit.label,
            UrlUtils::obfuscate_credentials(&url)
        ));
        session.goto(&url).await?;

        for action in &self.config.actions {
            match action {
                BrowserAction::Select { selector, value } => {
                    session.select(selector, &fill(value)).await?
                }
                BrowserAction::Click { selector } => session.click(selector).await?,
                BrowserAction::Wait { millis } => {
                    tokio::time::sleep(Duration::from_millis(*millis)).await
                }
            }
        }

        let mut collected: Option<RecordSet> = None;
        for page in 1..=self.config.max_pages.max(1) {
            let html = session.page_source().await?;
            if let Some(marker) = &self.config.no_data_text
                && html.contains(marker.as_str())
            {
                if page == 1 {
                    return Ok(StageOutput::no_data(marker.clone()));
                }
                break;
            }

            match find_table(&html, &self.config.table) {
                Some(table) => {
                    let set = parse_table(table)?;
                    debug!("Page {} of unit {} has {} rows", page, unit.label, set.len());
                    match collected.as_mut() {
                        Some(all) => all.concat(set),
                        None => collected = Some(set),
                    }
                }
                None => ctx
                    .log
                    .warn(format!("[{}] Page {} has no table, skipping", unit.label, page)),
            }

            let Some(next) = &self.config.next_page else {
                break;
            };
            if page == self.config.max_pages {
                ctx.log.warn(format!(
                    "[{}] Stopped after {} pages",
                    unit.label, self.config.max_pages
                ));
                break;
            }
            // The last page has no usable next link
            if let Err(e) = session.click(next).await {
                debug!("No further pages for {}: {}", unit.label, e);
                break;
            }
        }

        Ok(match collected {
            Some(set) if !set.is_empty() => StageOutput::Data(set),
            _ => StageOutput::no_data("no table rows on any page"),
        })
    }
}

#[async_trait]
impl Extractor for ScrapeExtractor {
    async fn extract(&self, ctx: &RunContext<'_>, unit: &WorkUnit) -> StageResult<RecordSet> {
        let mut session = self
            .browser
            .open()
            .await
            .map_err(|e| StageError::extraction(format!("{}: opening browser: {e}", ctx.source)))?;
        let result = self.scrape(session.as_mut(), ctx, unit).await;
        if let Err(e) = session.close().await {
            warn!("Closing browser session for {} failed: {}", ctx.source, e);
        }
        result.map_err(|e| StageError::extraction(format!("{}: {e}", ctx.source)))
    }
}
