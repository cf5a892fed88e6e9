//! Email delivery: message building plus a sendmail-compatible transport.
//!
//! Messages are built with lettre, which takes care of MIME structure,
//! attachment encoding and RFC 2047 encoding of non-ASCII headers. The
//! SMTP transport lives in [`super::smtp`].

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::Mailer;

const ATTACHMENT_NAME: &str = "final_video.mp4";

/// What goes into one delivery email
#[derive(Debug, Clone)]
pub struct MailMessage<'a> {
    /// Defaults to the recipient, so a mailbox can mail itself
    pub sender: Option<&'a str>,
    pub recipient: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub attachment: &'a [u8],
}

/// Header values may not contain line breaks
pub fn check_header(field: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        anyhow::bail!("{} contains a line break", field);
    }
    Ok(())
}

fn mailbox(field: &str, value: &str) -> Result<Mailbox> {
    check_header(field, value)?;
    value
        .parse()
        .with_context(|| format!("Invalid {} address: {}", field, value))
}

/// Build a multipart/mixed message with the clip attached
pub fn build_message(message: &MailMessage<'_>) -> Result<Message> {
    check_header("subject", message.subject)?;
    let to = mailbox("recipient", message.recipient)?;
    let from = match message.sender {
        Some(sender) => mailbox("sender", sender)?,
        None => to.clone(),
    };

    let content_type = ContentType::parse("video/mp4")
        .map_err(|e| anyhow::anyhow!("Invalid content type: {}", e))?;
    let attachment = Attachment::new(ATTACHMENT_NAME.to_string())
        .body(message.attachment.to_vec(), content_type);

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(message.body.to_string()))
                .singlepart(attachment),
        )
        .context("Failed to build email")
}

/// Hands messages to `sendmail -t -i`
pub struct SendmailMailer {
    binary_path: String,
    sender: Option<String>,
    subject: String,
    body: String,
}

impl SendmailMailer {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            binary_path: "sendmail".to_string(),
            sender: None,
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn with_sender(mut self, sender: Option<String>) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_binary_path(mut self, binary_path: Option<String>) -> Self {
        if let Some(binary_path) = binary_path {
            self.binary_path = binary_path;
        }
        self
    }
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, video: &[u8], recipient: &str, limit: Duration) -> Result<bool> {
        let message = build_message(&MailMessage {
            sender: self.sender.as_deref(),
            recipient,
            subject: &self.subject,
            body: &self.body,
            attachment: video,
        })?
        .formatted();

        let mut child = Command::new(&self.binary_path)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.binary_path))?;

        let delivery = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&message)
                    .await
                    .context("Failed to write message to sendmail")?;
                // Dropping stdin signals EOF
            }
            child
                .wait_with_output()
                .await
                .context("Failed to wait for sendmail")
        };

        let output = timeout(limit, delivery)
            .await
            .with_context(|| format!("sendmail timed out after {:?}", limit))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "sendmail failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        Ok(true)
    }
}
