//! Mail digest of newly found interesting entries.

use crate::config::MailConfig;
use crate::entry::{Entry, EntryKind};
use crate::geo::{nearest, ReferenceLocation};
use crate::http::HttpClient;
use crate::{Result, ScoutError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, instrument};

/// Delivers a finished digest.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Subject line for a digest of `count` entries.
pub fn digest_subject(count: usize) -> String {
    match count {
        1 => String::from("1 new interesting windsurf offer"),
        n => format!("{} new interesting windsurf offers", n),
    }
}

/// Plain-text digest, grouped by kind in their usual order.
pub fn render_digest(entries: &[&Entry], references: &[ReferenceLocation]) -> String {
    let mut body = String::new();

    for kind in EntryKind::ALL {
        let group: Vec<&&Entry> = entries.iter().filter(|e| e.kind() == kind).collect();
        if group.is_empty() {
            continue;
        }

        let _ = writeln!(body, "== {} ({}) ==", kind.display_name(), group.len());
        for entry in group {
            let offer = entry.offer();
            let _ = writeln!(body, "{}", offer.title);
            let _ = writeln!(body, "  Price: {}", offer.price);

            let closest = if entry.metadata.lat_long.is_known() {
                nearest(entry.metadata.lat_long, references)
            } else {
                None
            };
            match closest {
                Some((reference, km)) => {
                    let _ = writeln!(body, "  Location: {} ({:.0} km from {})", offer.location, km, reference.name);
                }
                None => {
                    let _ = writeln!(body, "  Location: {}", offer.location);
                }
            }
            let _ = writeln!(body, "  Link: {}", offer.link);
            body.push('\n');
        }
    }

    body
}

/// Sends the digest for `entries` unless there is nothing to report.
///
/// # Returns
///
/// Whether a mail was sent.
pub async fn notify(mailer: &dyn Mailer, entries: &[&Entry], references: &[ReferenceLocation]) -> Result<bool> {
    if entries.is_empty() {
        info!("No interesting entries, no mail sent");
        return Ok(false);
    }

    let subject = digest_subject(entries.len());
    mailer.send(&subject, &render_digest(entries, references)).await?;
    info!(entries = entries.len(), "Sent digest");
    Ok(true)
}

/// Writes the digest to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        info!(subject = %subject, "Mail delivery not configured, logging digest:\n{}", body);
        Ok(())
    }
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(rename = "Messages", default)]
    messages: Vec<MessageStatus>,
}

#[derive(Deserialize)]
struct MessageStatus {
    #[serde(rename = "Status")]
    status: String,
}

/// Mailjet send API (v3.1).
pub struct MailjetMailer {
    http: Arc<HttpClient>,
    api_key: String,
    secret_key: String,
    from_email: String,
    from_name: String,
    recipients: Vec<String>,
    base_url: String,
}

impl MailjetMailer {
    /// Builds the mailer when both keys and at least one recipient are configured.
    pub fn from_config(http: Arc<HttpClient>, config: &MailConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let secret_key = config.secret_key.clone()?;
        if config.recipients.is_empty() {
            return None;
        }

        Some(Self {
            http,
            api_key,
            secret_key,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            recipients: config.recipients.clone(),
            base_url: String::from("https://api.mailjet.com"),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl Mailer for MailjetMailer {
    #[instrument(skip(self, body))]
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let url = format!("{}/v3.1/send", self.base_url);
        let to: Vec<_> = self.recipients.iter().map(|email| json!({ "Email": email })).collect();
        let payload = json!({
            "Messages": [{
                "From": { "Email": self.from_email, "Name": self.from_name },
                "To": to,
                "Subject": subject,
                "TextPart": body,
            }]
        });

        let response = self
            .http
            .send_with_retries(&url, || {
                self.http
                    .inner()
                    .post(&url)
                    .basic_auth(&self.api_key, Some(&self.secret_key))
                    .json(&payload)
            })
            .await?;

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| ScoutError::MailError(format!("unreadable response: {}", e)))?;
        match sent.messages.iter().find(|m| m.status != "success") {
            Some(failed) => Err(ScoutError::MailError(format!("message status '{}'", failed.status))),
            None if sent.messages.is_empty() => Err(ScoutError::MailError(String::from("no message accepted"))),
            None => Ok(()),
        }
    }
}
