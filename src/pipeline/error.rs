//! Pipeline failure taxonomy
//!
//! Every stage reports failures as a [`StageError`] tagged with the
//! [`FailureKind`] that produced it, so the runner can report one uniform
//! message regardless of which stage failed.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Extraction,
    Validation,
    Transform,
    Load,
    /// Connection, file system and audit failures outside a stage
    Infrastructure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extraction => "Extraction",
            Self::Validation => "Validation",
            Self::Transform => "Transform",
            Self::Load => "Load",
            Self::Infrastructure => "Infrastructure",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} failure: {message}")]
pub struct StageError {
    pub kind: FailureKind,
    pub message: String,
}

impl StageError {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn extraction<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Extraction, message)
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn transform<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Transform, message)
    }

    pub fn load<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Load, message)
    }

    pub fn infrastructure<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Infrastructure, message)
    }

    /// Prefix the message with the unit of work it happened in
    pub fn in_unit(self, unit: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("[{unit}] {}", self.message),
        }
    }
}

/// Successful stage output: data, or an explicit "nothing for this unit"
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput<T> {
    Data(T),
    NoData { reason: String },
}

impl<T> StageOutput<T> {
    pub fn no_data<S: Into<String>>(reason: S) -> Self {
        Self::NoData {
            reason: reason.into(),
        }
    }
}

pub type StageResult<T> = Result<StageOutput<T>, StageError>;

/// Tag any displayable error with a failure kind at a stage boundary
pub trait StageResultExt<T> {
    fn stage_err(self, kind: FailureKind) -> Result<T, StageError>;

    fn stage_context(self, kind: FailureKind, context: &str) -> Result<T, StageError>;
}

impl<T, E: fmt::Display> StageResultExt<T> for Result<T, E> {
    fn stage_err(self, kind: FailureKind) -> Result<T, StageError> {
        self.map_err(|e| StageError::new(kind, e.to_string()))
    }

    fn stage_context(self, kind: FailureKind, context: &str) -> Result<T, StageError> {
        self.map_err(|e| StageError::new(kind, format!("{context}: {e}")))
    }
}
