//! Default configuration values
//!
//! Centralized defaults shared by the serde `default = ...` functions and by
//! the example configuration file.

use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "etl.toml";
pub const ENV_PREFIX: &str = "ETL_";

pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";
pub const DEFAULT_LOG_DIR: &str = "logs";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_FLOW_TABLE: &str = "reporting.ETLFlowMaster";
pub const DEFAULT_FLOW_DATA_SOURCE_COLUMN: &str = "DataSource";
pub const DEFAULT_FLOW_SEQUENCE_COLUMN: &str = "SeqNo";
pub const DEFAULT_FLOW_QUERY_COLUMN: &str = "QueryText";
pub const DEFAULT_FLOW_UPDATE_MODE_COLUMN: &str = "UpdateMode";

pub const DEFAULT_AUDIT_TABLE: &str = "reporting.etl_logs";

pub const DEFAULT_UPLOAD_STATUS_FILE_COLUMN: &str = "etlserverfiles";
pub const DEFAULT_UPLOAD_STATUS_STATUS_COLUMN: &str = "etlstatus";
pub const DEFAULT_UPLOAD_STATUS_REMARKS_COLUMN: &str = "etlremarks";

pub const DEFAULT_SMTP_PORT: u16 = 587;

pub const DEFAULT_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Stays under SQLite's 32766 host-parameter ceiling; PostgreSQL and MySQL allow 65535.
pub const DEFAULT_MAX_BIND_PARAMS: usize = 30_000;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_HEADER_SEPARATOR: &str = "|";
pub const DEFAULT_MAX_PAGES: usize = 50;
