//! Source catalog entries as they appear under `[sources.<name>]`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::Config;
use crate::dataset::delimited::encoding_for_label;
use crate::errors::{AppError, AppResult};
use crate::load::{FlowStep, LoadMode};
use crate::pipeline::units::UnitPlan;
use crate::sources::ExtractConfig;
use crate::transform::TransformStep;
use crate::validate::ValidationRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name shown in notifications and log lines; defaults to the catalog key
    #[serde(default)]
    pub display_name: Option<String>,
    /// Value written to the audit table's `etl_job` column
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub units: UnitPlan,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub validate: Vec<ValidationRule>,
    #[serde(default)]
    pub transform: Vec<TransformStep>,
    #[serde(default)]
    pub staging: Option<StagingTarget>,
    #[serde(default)]
    pub reporting: Vec<FlowStep>,
    /// Directory holding `pending/`, `processed/` and `failed/` for uploaded files
    #[serde(default)]
    pub uploads: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingTarget {
    pub table: String,
    #[serde(default)]
    pub mode: LoadMode,
    /// Natural key columns, required for `upsert`
    #[serde(default)]
    pub key: Vec<String>,
}

impl SourceConfig {
    pub(crate) fn validate(&self, name: &str, config: &Config) -> AppResult<()> {
        if let Some(staging) = &self.staging
            && staging.mode == LoadMode::Upsert
            && staging.key.is_empty()
        {
            return Err(AppError::configuration(format!(
                "sources.{name}.staging: upsert mode needs at least one key column"
            )));
        }

        if self.units.watermark_column().is_some() && self.staging.is_none() {
            return Err(AppError::configuration(format!(
                "sources.{name}.units: date-driven units need a staging table to read the watermark from"
            )));
        }

        if matches!(self.units, UnitPlan::File) != matches!(self.extract, ExtractConfig::File(_)) {
            return Err(AppError::configuration(format!(
                "sources.{name}: file units and the file extractor must be used together"
            )));
        }
        if let ExtractConfig::File(file) = &self.extract
            && encoding_for_label(&file.encoding).is_none()
        {
            return Err(AppError::configuration(format!(
                "sources.{name}.extract: unknown encoding '{}'",
                file.encoding
            )));
        }

        for step in &self.transform {
            if let Some(lookup) = step.lookup_name()
                && !config.reference.lookups.contains_key(lookup)
            {
                return Err(AppError::configuration(format!(
                    "sources.{name}.transform: unknown reference lookup '{lookup}'"
                )));
            }
            if step.needs_exchange_rates() && config.reference.exchange_rates.is_none() {
                return Err(AppError::configuration(format!(
                    "sources.{name}.transform: convert_currency needs [reference.exchange_rates]"
                )));
            }
        }

        if !self.reporting.is_empty() {
            for step in &self.reporting {
                if step.sequence.is_empty() && step.procedures.is_empty() {
                    return Err(AppError::configuration(format!(
                        "sources.{name}.reporting: step for '{}' has no sequence numbers or procedures",
                        step.data_source
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.display_name.as_deref().unwrap_or(key)
    }

    pub fn job_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.job_name.as_deref().unwrap_or(key)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    #[test]
    fn test_upsert_without_key_rejected() {
        let err = Config::from_toml_str(
            r#"
[sources.cpi.staging]
table = "staging.cpi"
mode = "upsert"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("upsert mode needs at least one key column"));
    }

    #[test]
    fn test_unknown_lookup_rejected() {
        let err = Config::from_toml_str(
            r#"
[sources.crops]
transform = [{ op = "standardize", column = "state", lookup = "states" }]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown reference lookup 'states'"));
    }

    #[test]
    fn test_file_units_require_file_extractor() {
        let err = Config::from_toml_str(
            r#"
[sources.crops]
units = { kind = "file" }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("file units and the file extractor"));
    }

    #[test]
    fn test_names_fall_back_to_key() {
        let config = Config::from_toml_str(
            r#"
[sources.agmarknet]
display_name = "AgMarknet"
"#,
        )
        .unwrap();
        let source = &config.sources["agmarknet"];
        assert_eq!(source.display_name("agmarknet"), "AgMarknet");
        assert_eq!(source.job_name("agmarknet"), "agmarknet");
    }

    #[test]
    fn test_unknown_file_encoding_rejected() {
        let err = Config::from_toml_str(
            r#"
[sources.crops]
units = { kind = "file" }
extract = { kind = "file", encoding = "ebcdic-ish" }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown encoding 'ebcdic-ish'"));
    }
}
