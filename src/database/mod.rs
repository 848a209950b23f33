//! SeaORM-based database access
//!
//! One [`Database`] handle is opened per environment invocation and closed
//! when the invocation ends. Supported backends:
//! - SQLite
//! - PostgreSQL
//! - MySQL

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction,
};
use std::collections::BTreeMap;
use std::error::Error;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, EnvironmentConfig};
use crate::errors::{AppError, AppResult, RepositoryError};
use crate::pipeline::ConnectionProvider;
use crate::utils::url::UrlUtils;

pub mod flow;
pub mod job_status;
pub mod reference;
pub mod sql;
pub mod staging;
pub mod upload_status;

pub use flow::FlowRepository;
pub use job_status::DbJobStatusRecorder;
pub use reference::DbReferenceData;
pub use staging::{LoadMode, StagingRepository};
pub use upload_status::UploadStatusRepository;

/// Connection handle scoped to one pipeline invocation
#[derive(Clone)]
pub struct Database {
    connection: DatabaseConnection,
    backend: DatabaseBackend,
    database_type: DatabaseType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    SQLite,
    PostgreSQL,
    MySQL,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "SQLite",
            DatabaseType::PostgreSQL => "PostgreSQL",
            DatabaseType::MySQL => "MySQL",
        }
    }

    fn backend(self) -> DatabaseBackend {
        match self {
            DatabaseType::SQLite => DatabaseBackend::Sqlite,
            DatabaseType::PostgreSQL => DatabaseBackend::Postgres,
            DatabaseType::MySQL => DatabaseBackend::MySql,
        }
    }
}

impl Database {
    /// Open a connection for one invocation
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let database_type = Self::detect_database_type(&config.url)?;
        let safe_url = UrlUtils::obfuscate_credentials(&config.url);

        info!("Connecting to {} database at {}", database_type.as_str(), safe_url);

        let connection_url = match database_type {
            DatabaseType::SQLite => Self::ensure_sqlite_auto_creation(&config.url)?,
            _ => config.url.clone(),
        };

        let mut connect_options = ConnectOptions::new(connection_url.as_str());
        connect_options
            .max_connections(config.max_connections.unwrap_or(1))
            .min_connections(1)
            .connect_timeout(config.connect_timeout)
            .acquire_timeout(config.acquire_timeout)
            .sqlx_logging(false);

        // An in-memory SQLite database lives as long as its connection; keep exactly one
        if connection_url.contains(":memory:") {
            connect_options.max_connections(1);
        }

        let connection = match SeaOrmDatabase::connect(connect_options).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Database connection failed: {}", e);
                let mut source = e.source();
                let mut level = 0;
                while let Some(err) = source {
                    tracing::error!("  Level {}: {}", level, err);
                    source = err.source();
                    level += 1;
                }
                return Err(RepositoryError::ConnectionFailed {
                    message: format!("{safe_url}: {e}"),
                }
                .into());
            }
        };

        debug!("Database connection established");

        Ok(Self {
            connection,
            backend: database_type.backend(),
            database_type,
        })
    }

    /// Wrap an already-open connection (used by tests and embedders)
    pub fn from_connection(connection: DatabaseConnection) -> Self {
        let backend = connection.get_database_backend();
        let database_type = match backend {
            DatabaseBackend::Postgres => DatabaseType::PostgreSQL,
            DatabaseBackend::MySql => DatabaseType::MySQL,
            _ => DatabaseType::SQLite,
        };
        Self {
            connection,
            backend,
            database_type,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Close the underlying pool; the handle is consumed
    pub async fn close(self) -> AppResult<()> {
        self.connection.close().await.map_err(AppError::from)
    }

    fn detect_database_type(url: &str) -> AppResult<DatabaseType> {
        if url.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(DatabaseType::PostgreSQL)
        } else if url.starts_with("mysql:") {
            Ok(DatabaseType::MySQL)
        } else {
            Err(AppError::configuration(format!(
                "Unsupported database URL format: {}",
                UrlUtils::obfuscate_credentials(url)
            )))
        }
    }

    /// Ensure a file-backed SQLite URL creates the database when missing
    fn ensure_sqlite_auto_creation(url: &str) -> AppResult<String> {
        if url.contains("mode=") || url.contains(":memory:") {
            return Ok(url.to_string());
        }

        let file_path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .ok_or_else(|| AppError::configuration(format!("Invalid SQLite URL format: {url}")))?;
        let file_path = file_path.split('?').next().unwrap_or(file_path);

        let path = std::path::Path::new(file_path);
        if path.exists() {
            return Ok(url.to_string());
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
            info!("Created directory for SQLite database: {}", parent.display());
        }

        let auto_create_url = if url.contains('?') {
            format!("{url}&mode=rwc")
        } else {
            format!("{url}?mode=rwc")
        };
        debug!("SQLite URL adjusted for auto-creation: {}", auto_create_url);
        Ok(auto_create_url)
    }
}

/// Connects to the database configured for each `[environments.<name>]`
pub struct EnvironmentConnections {
    environments: BTreeMap<String, EnvironmentConfig>,
}

impl EnvironmentConnections {
    pub fn new(environments: BTreeMap<String, EnvironmentConfig>) -> Self {
        Self { environments }
    }
}

#[async_trait]
impl ConnectionProvider for EnvironmentConnections {
    async fn connect(&self, environment: &str) -> AppResult<Database> {
        let env = self.environments.get(environment).ok_or_else(|| {
            AppError::configuration(format!("unknown environment '{environment}'"))
        })?;
        Database::connect(&env.database).await
    }
}

/// Roll back a transaction whose work failed, returning that failure.
///
/// A rollback error is logged and never replaces the original error.
pub(crate) async fn abort_transaction<T>(txn: DatabaseTransaction, error: AppError) -> AppResult<T> {
    if let Err(rollback) = txn.rollback().await {
        warn!("Rollback failed after error ({error}): {rollback}");
    }
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::TransactionTrait;
    use std::time::Duration;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            max_connections: None,
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_detect_database_type() {
        assert_eq!(
            Database::detect_database_type("sqlite::memory:").unwrap(),
            DatabaseType::SQLite
        );
        assert_eq!(
            Database::detect_database_type("postgresql://u@h/db").unwrap(),
            DatabaseType::PostgreSQL
        );
        assert_eq!(
            Database::detect_database_type("mysql://u@h/db").unwrap(),
            DatabaseType::MySQL
        );
        let err = Database::detect_database_type("oracle://u:pw@h/db").unwrap_err();
        assert!(!err.to_string().contains("pw"));
    }

    #[test]
    fn test_sqlite_auto_creation_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("etl.db");
        let url = format!("sqlite://{}", path.display());
        let adjusted = Database::ensure_sqlite_auto_creation(&url).unwrap();
        assert_eq!(adjusted, format!("{url}?mode=rwc"));
        assert!(path.parent().unwrap().exists());

        assert_eq!(
            Database::ensure_sqlite_auto_creation("sqlite::memory:").unwrap(),
            "sqlite::memory:"
        );
    }

    #[tokio::test]
    async fn test_connect_and_close_in_memory() {
        let db = Database::connect(&config("sqlite::memory:")).await.unwrap();
        assert_eq!(db.database_type(), DatabaseType::SQLite);
        assert_eq!(db.backend(), DatabaseBackend::Sqlite);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_repository_error() {
        let dir = tempfile::tempdir().unwrap();
        // mode=ro on a missing file cannot be opened
        let url = format!("sqlite://{}?mode=ro", dir.path().join("absent.db").display());
        let err = Database::connect(&config(&url)).await.err().unwrap();
        assert!(matches!(
            err,
            AppError::Repository(RepositoryError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_environment_connections() {
        let mut environments = BTreeMap::new();
        environments.insert(
            "dev".to_string(),
            EnvironmentConfig {
                display_name: None,
                database: config("sqlite::memory:"),
            },
        );
        let provider = EnvironmentConnections::new(environments);
        let db = provider.connect("dev").await.unwrap();
        db.close().await.unwrap();
        let err = provider.connect("prod").await.err().unwrap();
        assert!(err.to_string().contains("unknown environment 'prod'"));
    }

    #[tokio::test]
    async fn test_abort_transaction_keeps_original_error() {
        let db = Database::connect(&config("sqlite::memory:")).await.unwrap();
        let txn = db.connection().begin().await.unwrap();
        // End the transaction underneath the driver so its own rollback fails
        txn.execute_unprepared("ROLLBACK").await.unwrap();
        let err = abort_transaction::<u64>(txn, AppError::validation("insert failed"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: insert failed");
    }
}
