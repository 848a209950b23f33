//! Centralized error handling for the ETL jobs
//!
//! Crate-level errors live in [`types`]. Pipeline stages do not return these
//! directly: at each stage boundary they are converted into a
//! [`crate::pipeline::StageError`] carrying the failure taxonomy kind.
//!
//! # Usage
//!
//! ```rust
//! use etl_jobs::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::configuration("missing environment"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Source Results
pub type SourceResult<T> = Result<T, SourceError>;
