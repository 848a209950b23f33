//! Run notifications
//!
//! Every environment invocation ends with exactly one notification. Email is
//! used when `[email]` is configured, otherwise notifications only go to the
//! tracing log.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::errors::AppResult;

pub mod email;

pub use email::EmailNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Critical,
}

impl Severity {
    /// Subject prefix
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub severity: Severity,
    pub subject: String,
    pub body: String,
    /// Run log file sent along with the message
    pub attachment: Option<PathBuf>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> AppResult<()>;
}

/// Writes notifications to the tracing log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        match notification.severity {
            Severity::Info => info!(
                subject = %notification.subject,
                "{}",
                notification.body
            ),
            Severity::Critical => error!(
                subject = %notification.subject,
                "{}",
                notification.body
            ),
        }
        Ok(())
    }
}

/// Email when configured, otherwise the log
pub fn from_config(config: &Config) -> AppResult<Arc<dyn Notifier>> {
    match &config.email {
        Some(email) => Ok(Arc::new(EmailNotifier::new(email.clone())?)),
        None => {
            info!("No [email] section, notifications go to the log only");
            Ok(Arc::new(LogNotifier))
        }
    }
}
