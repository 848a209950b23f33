//! HTTP API extractor
//!
//! Requests one URL per unit, with dates substituted into the URL, headers
//! and body, and reads the response as JSON records or CSV.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::ensure_success;
use super::template::render;
use crate::config::DEFAULT_DATE_FORMAT;
use crate::dataset::RecordSet;
use crate::dataset::delimited::{CsvOptions, read_csv};
use crate::dataset::json::records_from_json;
use crate::errors::AppResult;
use crate::pipeline::{Extractor, RunContext, StageError, StageOutput, StageResult, WorkUnit};
use crate::utils::url::UrlUtils;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Csv,
}

/// A JSON field whose value marks an empty response, e.g. `statusMsg`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoDataMarker {
    pub field: String,
    pub equals: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw request body template
    #[serde(default)]
    pub body: Option<String>,
    /// Form fields sent url-encoded when no raw body is given
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub format: ResponseFormat,
    /// Dotted path to the record array inside a JSON response
    #[serde(default)]
    pub records_key: Option<String>,
    #[serde(default)]
    pub no_data: Option<NoDataMarker>,
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

pub struct ApiExtractor {
    config: ApiConfig,
    client: Client,
}

impl ApiExtractor {
    pub fn new(config: ApiConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn fetch(&self, ctx: &RunContext<'_>, unit: &WorkUnit) -> AppResult<String> {
        let fill = |template: &str| render(template, unit, ctx.run_date, &self.config.date_format);
        let url = fill(&self.config.url);
        let safe_url = UrlUtils::obfuscate_credentials(&url);
        ctx.log.info(format!(
            "[{}] {:?} {}",
            unit.label, self.config.method, safe_url
        ));

        let mut request = match self.config.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), fill(value));
        }
        if let Some(body) = &self.config.body {
            request = request.body(fill(body));
        } else if !self.config.form.is_empty() {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for (name, value) in &self.config.form {
                form.append_pair(name, &fill(value));
            }
            request = request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form.finish());
        }

        let response = request.send().await?;
        ensure_success(response.status(), &url)?;
        let text = response.text().await?;
        debug!("Received {} bytes from {}", text.len(), safe_url);
        Ok(text)
    }
}

/// Turn a response body into records; empty results are `NoData`
pub fn parse_response(config: &ApiConfig, body: &str) -> AppResult<StageOutput<RecordSet>> {
    let set = match config.format {
        ResponseFormat::Json => {
            let document: serde_json::Value = serde_json::from_str(body)?;
            if let Some(marker) = &config.no_data
                && document
                    .get(&marker.field)
                    .and_then(|v| v.as_str())
                    .is_some_and(|v| v.trim() == marker.equals.trim())
            {
                return Ok(StageOutput::no_data(format!("{} is '{}'", marker.field, marker.equals)));
            }
            records_from_json(&document, config.records_key.as_deref())?
        }
        ResponseFormat::Csv => read_csv(body.as_bytes(), &CsvOptions::default())?,
    };
    if set.is_empty() {
        Ok(StageOutput::no_data("empty response"))
    } else {
        Ok(StageOutput::Data(set))
    }
}

#[async_trait]
impl Extractor for ApiExtractor {
    async fn extract(&self, ctx: &RunContext<'_>, unit: &WorkUnit) -> StageResult<RecordSet> {
        let body = self
            .fetch(ctx, unit)
            .await
            .map_err(|e| StageError::extraction(format!("{}: {e}", ctx.source)))?;
        parse_response(&self.config, &body)
            .map_err(|e| StageError::extraction(format!("{}: {e}", ctx.source)))
    }
}
