use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    Message, SmtpTransport, Transport,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::SmtpConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("mail delivery is disabled")]
    Disabled,
    #[error("invalid address {0}")]
    InvalidAddress(String),
    #[error("failed to build email: {0}")]
    Message(String),
    #[error("failed to send email: {0}")]
    Transport(String),
}

/// Outbound mail port.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

/// SMTP delivery over STARTTLS, authenticated with the configured account.
pub struct SmtpMailer {
    from: Mailbox,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let from = cfg
            .username
            .parse::<Mailbox>()
            .map_err(|_| MailError::InvalidAddress(cfg.username.clone()))?;
        let transport = SmtpTransport::starttls_relay(&cfg.host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .port(cfg.port)
            .pool_config(PoolConfig::new().max_size(4))
            .timeout(Some(Duration::from_secs(10)))
            .build();
        debug!(host = %cfg.host, port = cfg.port, "smtp transport ready");
        Ok(Self { from, transport })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        let recipient = to
            .parse::<Mailbox>()
            .map_err(|_| MailError::InvalidAddress(to.to_string()))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| MailError::Message(e.to_string()))?;

        // lettre's SMTP transport is blocking.
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?
            .map_err(|e| {
                error!(error = %e, "smtp send failed");
                MailError::Transport(e.to_string())
            })?;

        info!(to, subject, "email sent");
        Ok(())
    }
}

/// Used when SMTP is turned off.
pub struct DisabledMailer;

#[async_trait]
impl MailSender for DisabledMailer {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), MailError> {
        Err(MailError::Disabled)
    }
}

pub const VERIFICATION_SUBJECT: &str = "Email Verification";

pub fn verification_email(token: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Verification Token</title>
</head>
<body>
  <div>
    <h1>Let's verify your account</h1>
    <h1>Your token is <span>{token}</span></h1>
    <p>Have a nice day</p>
  </div>
</body>
</html>"#
    )
}
