// src/email.rs - SMTP email service
use crate::error::{Result, VigilError};
use crate::repository::EmailService;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// SMTP connection configuration
///
/// Credentials may be given inline or through the `SMTP_USERNAME` /
/// `SMTP_PASSWORD` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay host
    pub host: String,
    /// SMTP port
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Sender address
    pub from: String,
    /// Login user; falls back to `SMTP_USERNAME`
    #[serde(default)]
    pub username: Option<String>,
    /// Login password; falls back to `SMTP_PASSWORD`
    #[serde(default)]
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

/// Sends trigger notification emails over SMTP
pub struct SmtpEmailService {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpEmailService {
    /// Build the transport from configuration
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let username = config
            .username
            .clone()
            .or_else(|| std::env::var("SMTP_USERNAME").ok())
            .ok_or_else(|| VigilError::Config("SMTP username not set".into()))?;
        let password = config
            .password
            .clone()
            .or_else(|| std::env::var("SMTP_PASSWORD").ok())
            .ok_or_else(|| VigilError::Config("SMTP password not set".into()))?;

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| VigilError::Config(format!("SMTP relay '{}': {}", config.host, e)))?
            .port(config.port)
            .credentials(Credentials::new(username, password))
            .build();

        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| VigilError::Config(format!("sender address '{}': {}", config.from, e)))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailService for SmtpEmailService {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject);
        for recipient in recipients {
            let mailbox = recipient
                .parse::<Mailbox>()
                .map_err(|e| VigilError::Email(format!("recipient '{}': {}", recipient, e)))?;
            builder = builder.to(mailbox);
        }
        let message = builder
            .body(body.to_string())
            .map_err(|e| VigilError::Email(e.to_string()))?;

        let transport = self.transport.clone();
        // SmtpTransport::send is blocking; keep it off the runtime workers.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| VigilError::Email(e.to_string()))?
            .map_err(|e| VigilError::Email(e.to_string()))?;

        debug!(recipients = recipients.len(), "email handed to SMTP relay");
        Ok(())
    }
}
