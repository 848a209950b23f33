//! Uploaded file extractor

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::DEFAULT_HEADER_SEPARATOR;
use crate::dataset::RecordSet;
use crate::dataset::delimited::{CsvOptions, encoding_for_label, read_csv};
use crate::dataset::workbook::{WorkbookOptions, read_workbook};
use crate::errors::{AppError, AppResult, SourceError};
use crate::pipeline::{Extractor, RunContext, StageError, StageOutput, StageResult, WorkUnit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_level_separator")]
    pub level_separator: String,
    /// Text encoding of delimited uploads (`utf-8`, `cp1252`, ...)
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Workbook sheet name; the first sheet when unset
    #[serde(default)]
    pub sheet: Option<String>,
}

fn default_header_rows() -> usize {
    1
}

fn default_delimiter() -> char {
    ','
}

fn default_level_separator() -> String {
    DEFAULT_HEADER_SEPARATOR.to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            header_rows: default_header_rows(),
            skip_rows: 0,
            delimiter: default_delimiter(),
            level_separator: default_level_separator(),
            encoding: default_encoding(),
            sheet: None,
        }
    }
}

impl FileConfig {
    fn csv_options(&self) -> AppResult<CsvOptions> {
        if !self.delimiter.is_ascii() {
            return Err(SourceError::invalid_config("delimiter", "must be a single ASCII character").into());
        }
        let encoding = encoding_for_label(&self.encoding).ok_or_else(|| {
            SourceError::invalid_config("encoding", format!("unknown encoding '{}'", self.encoding))
        })?;
        Ok(CsvOptions {
            delimiter: self.delimiter as u8,
            skip_rows: self.skip_rows,
            header_rows: self.header_rows.max(1),
            level_separator: self.level_separator.clone(),
            encoding,
        })
    }

    fn workbook_options(&self) -> WorkbookOptions {
        WorkbookOptions {
            sheet: self.sheet.clone(),
            skip_rows: self.skip_rows,
            header_rows: self.header_rows.max(1),
            level_separator: self.level_separator.clone(),
        }
    }
}

pub struct FileExtractor {
    config: FileConfig,
}

impl FileExtractor {
    pub fn new(config: FileConfig) -> Self {
        Self { config }
    }

    async fn read(&self, path: &Path) -> AppResult<RecordSet> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" | "txt" | "tsv" => {
                let options = self.config.csv_options()?;
                let bytes = tokio::fs::read(path).await?;
                read_csv(bytes.as_slice(), &options)
            }
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => {
                let options = self.config.workbook_options();
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || read_workbook(&path, &options))
                    .await
                    .map_err(|e| AppError::internal(format!("workbook reader stopped: {e}")))?
            }
            other => Err(AppError::validation(format!(
                "{} has unsupported extension '{}'",
                path.display(),
                other
            ))),
        }
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    async fn extract(&self, ctx: &RunContext<'_>, unit: &WorkUnit) -> StageResult<RecordSet> {
        let Some(path) = unit.file.as_deref() else {
            return Err(StageError::extraction(format!(
                "{}: unit {} has no file",
                ctx.source, unit.label
            )));
        };
        ctx.log.info(format!("Reading {}", path.display()));
        let set = self
            .read(path)
            .await
            .map_err(|e| StageError::extraction(format!("{}: {}: {e}", ctx.source, unit.label)))?;
        if set.is_empty() {
            return Ok(StageOutput::no_data(format!("{} has no data rows", unit.label)));
        }
        Ok(StageOutput::Data(set))
    }
}
