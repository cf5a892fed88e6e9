//! Authenticated SMTP delivery.
//!
//! Connects with implicit TLS (SMTPS, usually port 465) or, when asked,
//! upgrades a plain connection with STARTTLS (usually port 587).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tokio::time::timeout;
use tracing::debug;

use super::mail::{build_message, MailMessage};
use super::Mailer;

/// Server and login for an SMTP relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpServer {
    pub host: String,
    pub port: u16,
    pub starttls: bool,
    pub username: String,
}

pub struct SmtpMailer {
    server: SmtpServer,
    /// Resolved from the environment; a missing password fails at send time
    password: Option<String>,
    sender: Option<String>,
    subject: String,
    body: String,
}

impl SmtpMailer {
    pub fn new(
        server: SmtpServer,
        password: Option<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            server,
            password,
            sender: None,
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Defaults to the login name, which most relays require anyway
    pub fn with_sender(mut self, sender: Option<String>) -> Self {
        self.sender = sender;
        self
    }

    fn transport(
        &self,
        password: &str,
        limit: Duration,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.server.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server.host)
        };
        let builder = builder.with_context(|| format!("Invalid SMTP host: {}", self.server.host))?;

        Ok(builder
            .port(self.server.port)
            .credentials(Credentials::new(self.server.username.clone(), password.to_string()))
            .timeout(Some(limit))
            .build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, video: &[u8], recipient: &str, limit: Duration) -> Result<bool> {
        let password = self
            .password
            .as_deref()
            .context("SMTP password is not set")?;

        let message = build_message(&MailMessage {
            sender: Some(self.sender.as_deref().unwrap_or(&self.server.username)),
            recipient,
            subject: &self.subject,
            body: &self.body,
            attachment: video,
        })?;

        let transport = self.transport(password, limit)?;
        debug!(host = %self.server.host, port = self.server.port, "Sending mail");

        let response = timeout(limit, transport.send(message))
            .await
            .with_context(|| format!("SMTP delivery timed out after {:?}", limit))?
            .with_context(|| format!("SMTP delivery via {} failed", self.server.host))?;

        Ok(response.is_positive())
    }
}
