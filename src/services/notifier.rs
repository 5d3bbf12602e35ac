// src/services/notifier.rs

//! Notification delivery.
//!
//! A batch of new listings is rendered into a [`Digest`] (grouped by target)
//! and handed to a transport. The transport only reports whether the batch
//! was delivered; the caller decides what that means for stored records.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{NotifierConfig, NotifierKind, NotifyEntry};

/// Delivers one batch of entries. `Ok` means delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &str;

    async fn notify(&self, entries: &[NotifyEntry]) -> Result<()>;
}

/// How entries are turned into a digest.
#[derive(Debug, Clone)]
pub struct DigestFormat {
    pub subject_prefix: String,
    pub template: String,
    /// Zone for every time shown to the reader
    pub offset: FixedOffset,
}

impl DigestFormat {
    pub fn new(config: &NotifierConfig, offset: FixedOffset) -> Self {
        Self {
            subject_prefix: config.subject_prefix.clone(),
            template: config.template.clone(),
            offset,
        }
    }
}

/// One listing as shown in the HTML digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestItem {
    pub title: String,
    pub url: String,
    /// Location, detail and found time joined by ` | `, blanks left out
    pub meta: String,
}

/// Listings from one target within a digest.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DigestSection {
    pub target: String,
    pub target_url: String,
    pub lines: Vec<String>,
    #[serde(skip)]
    pub items: Vec<DigestItem>,
}

/// Rendered notification payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub count: usize,
    pub sections: Vec<DigestSection>,
    pub generated_at: String,
}

impl Digest {
    /// Group entries by target, keeping the order targets first appear in.
    pub fn build(entries: &[NotifyEntry], format: &DigestFormat) -> Self {
        let mut sections: Vec<DigestSection> = Vec::new();

        for entry in entries {
            let line = entry.format(&format.template, format.offset);
            let item = DigestItem {
                title: entry.title.clone(),
                url: entry.url.clone(),
                meta: [
                    entry.location.clone(),
                    entry.detail.clone(),
                    entry.format("{found_time}", format.offset),
                ]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" | "),
            };

            match sections.iter_mut().find(|s| s.target == entry.target) {
                Some(section) => {
                    section.lines.push(line);
                    section.items.push(item);
                }
                None => sections.push(DigestSection {
                    target: entry.target.clone(),
                    target_url: entry.target_url.clone(),
                    lines: vec![line],
                    items: vec![item],
                }),
            }
        }

        Self {
            subject: format!("{}{} new listings", format.subject_prefix, entries.len()),
            count: entries.len(),
            sections,
            generated_at: Utc::now()
                .with_timezone(&format.offset)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        }
    }

    /// Plain-text body.
    pub fn body(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("== {} ({}) ==\n", section.target, section.lines.len()));
            if !section.target_url.is_empty() {
                out.push_str(&section.target_url);
                out.push('\n');
            }
            for line in &section.lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    /// HTML body: a count banner, then one block per target.
    pub fn html(&self) -> String {
        let mut sections = String::new();
        for section in &self.sections {
            let name = encode_text(&section.target);
            let heading = if section.target_url.is_empty() {
                name.to_string()
            } else {
                format!(
                    r#"<a href="{}">{name}</a>"#,
                    encode_double_quoted_attribute(&section.target_url)
                )
            };

            let mut items = String::new();
            for item in &section.items {
                items.push_str(&format!(
                    r#"<div class="job-item"><a class="job-title" href="{}">{}</a><div class="job-meta">{}</div></div>"#,
                    encode_double_quoted_attribute(&item.url),
                    encode_text(&item.title),
                    encode_text(&item.meta),
                ));
                items.push('\n');
            }

            sections.push_str(&format!(
                "<div class=\"section\"><h2>{heading} ({})</h2>\n{items}</div>\n",
                section.items.len()
            ));
        }

        format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"UTF-8\"><style>{HTML_STYLE}</style></head>\n\
             <body><div class=\"header\"><div class=\"count\">{count}</div><p>{count} new listings</p></div>\n\
             {sections}<div class=\"footer\">Generated {generated}</div></body></html>\n",
            count = self.count,
            generated = self.generated_at,
        )
    }
}

const HTML_STYLE: &str = "body{font-family:Arial,sans-serif;color:#333;max-width:800px;margin:0 auto;padding:20px}\
.header{background:#667eea;color:#fff;padding:20px;border-radius:8px;text-align:center}\
.count{font-size:40px;font-weight:bold}\
.section{margin:20px 0;border:1px solid #e0e0e0;border-radius:8px;padding:0 16px}\
.job-item{padding:8px 0;border-bottom:1px solid #eee}\
.job-title{font-weight:600;color:#1a73e8;text-decoration:none}\
.job-meta{font-size:12px;color:#666}\
.footer{margin-top:20px;color:#999;font-size:12px;text-align:center}";

/// Writes the digest to the log. Never fails.
pub struct LogNotifier {
    format: DigestFormat,
}

impl LogNotifier {
    pub fn new(format: DigestFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, entries: &[NotifyEntry]) -> Result<()> {
        let digest = Digest::build(entries, &self.format);
        log::info!("{}", digest.subject);
        for line in digest.body().lines().filter(|l| !l.is_empty()) {
            log::info!("  {line}");
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    text: String,
    count: usize,
    sections: &'a [DigestSection],
    entries: &'a [NotifyEntry],
    sent_at: chrono::DateTime<Utc>,
}

/// POSTs the digest as JSON, retrying until a 2xx or `max_retry` attempts.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    format: DigestFormat,
    max_retry: u32,
    retry_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(config: &NotifierConfig, format: DigestFormat) -> Result<Self> {
        let url = config
            .webhook_url
            .clone()
            .ok_or_else(|| AppError::config("notifier.webhook_url is required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url,
            format,
            max_retry: config.max_retry.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    async fn post_once(&self, payload: &WebhookPayload<'_>) -> Result<()> {
        let response = self.client.post(&self.url).json(payload).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AppError::notify(format!(
                "webhook returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, entries: &[NotifyEntry]) -> Result<()> {
        let digest = Digest::build(entries, &self.format);
        let payload = WebhookPayload {
            subject: &digest.subject,
            text: digest.body(),
            count: digest.count,
            sections: &digest.sections,
            entries,
            sent_at: Utc::now(),
        };

        let mut last_error = None;
        for attempt in 1..=self.max_retry {
            match self.post_once(&payload).await {
                Ok(()) => {
                    log::info!("Webhook delivered: {}", digest.subject);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Webhook attempt {attempt}/{} failed: {e}", self.max_retry);
                    last_error = Some(e);
                }
            }
            if attempt < self.max_retry {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::notify("no delivery attempts made")))
    }
}

/// Sends the digest as a plain/HTML mail over SMTP.
///
/// With `use_ssl` the connection is TLS from the start (SMTPS); otherwise it
/// is upgraded with STARTTLS. The sender address doubles as the login.
pub struct EmailNotifier {
    server: String,
    port: u16,
    use_ssl: bool,
    sender: Mailbox,
    receiver: Mailbox,
    password: String,
    format: DigestFormat,
    max_retry: u32,
    retry_delay: Duration,
}

impl EmailNotifier {
    pub fn new(config: &NotifierConfig, format: DigestFormat) -> Result<Self> {
        let sender = config.sender_mailbox()?;
        let receiver = config.receiver_mailbox()?;
        let password = config
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::config("notifier.password is required"))?;

        Ok(Self {
            server: config.smtp_server.trim().to_string(),
            port: config.smtp_port,
            use_ssl: config.use_ssl,
            sender,
            receiver,
            password,
            format,
            max_retry: config.max_retry.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    fn message(&self, digest: &Digest) -> Result<Message> {
        Message::builder()
            .from(self.sender.clone())
            .to(self.receiver.clone())
            .subject(digest.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(digest.body(), digest.html()))
            .map_err(AppError::notify)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server)
        }
        .map_err(AppError::notify)?;

        Ok(builder
            .port(self.port)
            .credentials(Credentials::new(
                self.sender.email.to_string(),
                self.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(30)))
            .build())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, entries: &[NotifyEntry]) -> Result<()> {
        let digest = Digest::build(entries, &self.format);
        let message = self.message(&digest)?;
        let transport = self.transport()?;

        let mut last_error = None;
        for attempt in 1..=self.max_retry {
            match transport.send(message.clone()).await {
                Ok(_) => {
                    log::info!("Mail delivered to {}: {}", self.receiver, digest.subject);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Mail attempt {attempt}/{} failed: {e}", self.max_retry);
                    last_error = Some(AppError::notify(e));
                }
            }
            if attempt < self.max_retry {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::notify("no delivery attempts made")))
    }
}

/// Build the transport selected in config. Times in the digest are shown
/// in `offset`.
pub fn build_notifier(config: &NotifierConfig, offset: FixedOffset) -> Result<Arc<dyn Notifier>> {
    let format = DigestFormat::new(config, offset);
    Ok(match config.kind {
        NotifierKind::Log => Arc::new(LogNotifier::new(format)),
        NotifierKind::Webhook => Arc::new(WebhookNotifier::new(config, format)?),
        NotifierKind::Email => Arc::new(EmailNotifier::new(config, format)?),
    })
}

/// Two made-up entries for checking a notifier end to end.
pub fn sample_batch() -> Vec<NotifyEntry> {
    let now = Utc::now();
    vec![
        NotifyEntry {
            id: 0,
            target: "Example Corp".into(),
            target_url: "https://example.com/careers".into(),
            title: "Backend Engineer Intern".into(),
            url: "https://example.com/careers/backend-intern".into(),
            location: "Beijing".into(),
            detail: "Platform team".into(),
            found_time: now,
        },
        NotifyEntry {
            id: 0,
            target: "Example Corp".into(),
            target_url: "https://example.com/careers".into(),
            title: "Data Analyst Intern".into(),
            url: "https://example.com/careers/data-intern".into(),
            location: "Shanghai".into(),
            detail: "Analytics".into(),
            found_time: now,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn format(prefix: &str, template: &str) -> DigestFormat {
        DigestFormat {
            subject_prefix: prefix.into(),
            template: template.into(),
            offset: utc(),
        }
    }

    fn entry(target: &str, title: &str) -> NotifyEntry {
        NotifyEntry {
            id: 1,
            target: target.into(),
            target_url: format!("https://{}.example/careers", target.to_lowercase()),
            title: title.into(),
            url: format!("https://{}.example/jobs", target.to_lowercase()),
            location: String::new(),
            detail: String::new(),
            found_time: Utc::now(),
        }
    }

    fn webhook_config(url: String, max_retry: u32) -> NotifierConfig {
        NotifierConfig {
            kind: NotifierKind::Webhook,
            webhook_url: Some(url),
            max_retry,
            retry_delay_secs: 0,
            ..NotifierConfig::default()
        }
    }

    fn email_config() -> NotifierConfig {
        NotifierConfig {
            kind: NotifierKind::Email,
            smtp_server: "smtp.example.com".into(),
            sender: Some("Job Watch <watch@example.com>".into()),
            password: Some("app-password".into()),
            receiver: Some("me@example.com".into()),
            ..NotifierConfig::default()
        }
    }

    #[test]
    fn digest_groups_by_target_in_first_seen_order() {
        let entries = vec![
            entry("Beta", "Ops Intern"),
            entry("Acme", "Backend Intern"),
            entry("Beta", "QA Intern"),
        ];
        let digest = Digest::build(&entries, &format("[test] ", "{title}"));

        assert_eq!(digest.subject, "[test] 3 new listings");
        assert_eq!(digest.count, 3);
        let targets: Vec<_> = digest.sections.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(targets, vec!["Beta", "Acme"]);
        assert_eq!(digest.sections[0].lines, vec!["Ops Intern", "QA Intern"]);
        assert_eq!(digest.sections[0].items.len(), 2);
        assert!(digest.body().contains("== Beta (2) =="));
    }

    #[test]
    fn html_digest_escapes_listing_text() {
        let mut risky = entry("Acme", "R&D <Intern>");
        risky.location = "Beijing".into();
        risky.url = "https://acme.example/jobs?id=1&src=\"x\"".into();
        let html = Digest::build(&[risky], &format("", "{title}")).html();

        assert!(html.contains("R&amp;D &lt;Intern&gt;"));
        assert!(html.contains("href=\"https://acme.example/jobs?id=1&amp;src=&quot;x&quot;\""));
        assert!(html.contains("Beijing | "));
        assert!(html.contains(r#"<a href="https://acme.example/careers">Acme</a> (1)"#));
        assert!(!html.contains("<Intern>"));
    }

    #[test]
    fn digest_times_follow_offset() {
        let mut e = entry("Acme", "Backend Intern");
        e.found_time = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 3, 1, 23, 30, 0).unwrap();
        let format = DigestFormat {
            offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            ..format("", "{title} {found_time}")
        };
        let digest = Digest::build(&[e], &format);
        assert_eq!(digest.sections[0].lines, vec!["Backend Intern 2026-03-02 07:30:00"]);
        assert_eq!(digest.sections[0].items[0].meta, "2026-03-02 07:30:00");
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier::new(DigestFormat::new(&NotifierConfig::default(), utc()));
        assert!(notifier.notify(&sample_batch()).await.is_ok());
    }

    #[tokio::test]
    async fn webhook_posts_digest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_string_contains("\"count\":2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = webhook_config(format!("{}/hook", server.uri()), 3);
        let notifier = WebhookNotifier::new(&config, DigestFormat::new(&config, utc())).unwrap();
        notifier.notify(&sample_batch()).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let config = webhook_config(server.uri(), 2);
        let notifier = WebhookNotifier::new(&config, DigestFormat::new(&config, utc())).unwrap();
        let err = notifier.notify(&sample_batch()).await.unwrap_err();
        assert!(matches!(err, AppError::Notify(_)));
    }

    #[test]
    fn email_message_carries_both_bodies() {
        let config = email_config();
        let notifier = EmailNotifier::new(&config, DigestFormat::new(&config, utc())).unwrap();
        let digest = Digest::build(&sample_batch(), &notifier.format);

        let raw = String::from_utf8(notifier.message(&digest).unwrap().formatted()).unwrap();
        assert!(raw.contains("watch@example.com"));
        assert!(raw.contains("To: me@example.com"));
        assert!(raw.contains("new listings"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn email_requires_credentials() {
        let mut config = email_config();
        config.password = None;
        let format = DigestFormat::new(&config, utc());
        assert!(EmailNotifier::new(&config, format.clone()).is_err());

        let mut config = email_config();
        config.receiver = Some("not an address".into());
        assert!(EmailNotifier::new(&config, format).is_err());
    }

    #[test]
    fn build_notifier_follows_kind() {
        let log = build_notifier(&NotifierConfig::default(), utc()).unwrap();
        assert_eq!(log.name(), "log");

        let hook = build_notifier(&webhook_config("http://127.0.0.1:1/hook".into(), 1), utc()).unwrap();
        assert_eq!(hook.name(), "webhook");

        let mail = build_notifier(&email_config(), utc()).unwrap();
        assert_eq!(mail.name(), "email");
    }
}
