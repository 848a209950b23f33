//! SMTP notifications with the run log attached

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use super::{Notification, Notifier};
use crate::config::{EmailConfig, SmtpSecurity};
use crate::errors::{AppError, AppResult};

pub struct EmailNotifier {
    sender: Mailbox,
    recipients: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> AppResult<Self> {
        if config.recipients.is_empty() {
            return Err(AppError::configuration("email.recipients is empty"));
        }
        let sender: Mailbox = config.sender.parse()?;
        let recipients = config
            .recipients
            .iter()
            .map(|r| r.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = match config.security {
            SmtpSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
        }
        .port(config.smtp_port);
        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            sender,
            recipients,
            transport: builder.build(),
        })
    }

    /// Build the message: plain text body plus the log file, when it can be read
    pub async fn build_message(&self, notification: &Notification) -> AppResult<Message> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(notification.subject.clone());
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        let body = SinglePart::plain(notification.body.clone());
        let Some(path) = &notification.attachment else {
            return Ok(builder.singlepart(body)?);
        };
        match tokio::fs::read(path).await {
            Ok(content) => {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "etl.log".to_string());
                let attachment = Attachment::new(filename).body(content, ContentType::TEXT_PLAIN);
                Ok(builder.multipart(MultiPart::mixed().singlepart(body).singlepart(attachment))?)
            }
            Err(e) => {
                warn!("Cannot attach {}: {}", path.display(), e);
                Ok(builder.singlepart(body)?)
            }
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        let message = self.build_message(notification).await?;
        let response = self.transport.send(message).await?;
        debug!("SMTP accepted '{}' with code {}", notification.subject, response.code());
        Ok(())
    }
}
