//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Target;
use crate::utils::http::proxy_url;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP, retry and throttling behavior
    #[serde(default)]
    pub spider: SpiderConfig,

    /// Record store location and retention
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Daily check triggers
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Notification transport settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Pages to watch, in check order
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load and validate in one step. Any failure here is fatal at startup.
    pub fn load_validated(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Targets that take part in a run, in configured order.
    pub fn enabled_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.enabled)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.spider.timeout_secs == 0 {
            return Err(AppError::validation("spider.timeout_secs must be > 0"));
        }
        if self.spider.max_attempts == 0 {
            return Err(AppError::validation("spider.max_attempts must be > 0"));
        }
        check_range(
            "spider.retry_delay",
            self.spider.retry_delay_min_secs,
            self.spider.retry_delay_max_secs,
        )?;
        check_range(
            "spider.request_delay",
            self.spider.request_delay_min_secs,
            self.spider.request_delay_max_secs,
        )?;
        if self
            .spider
            .user_agents
            .iter()
            .any(|ua| ua.trim().is_empty())
        {
            return Err(AppError::validation("spider.user_agents contains an empty entry"));
        }

        for proxy in self.spider.proxies.iter().filter(|p| !p.trim().is_empty()) {
            reqwest::Proxy::all(proxy_url(proxy)).map_err(|e| {
                AppError::validation(format!("spider.proxies entry '{proxy}' is unusable: {e}"))
            })?;
        }

        if self.database.path.as_os_str().is_empty() {
            return Err(AppError::validation("database.path is empty"));
        }

        self.schedule.validate()?;
        self.notifier.validate()?;

        if self.targets.is_empty() {
            return Err(AppError::validation("No targets defined"));
        }
        let mut names = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !names.insert(target.name.to_lowercase()) {
                return Err(AppError::validation(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }
        }
        Ok(())
    }
}

fn check_range(name: &str, min: f64, max: f64) -> Result<()> {
    if min < 0.0 || max < 0.0 || !min.is_finite() || !max.is_finite() {
        return Err(AppError::validation(format!("{name} bounds must be >= 0")));
    }
    if min > max {
        return Err(AppError::validation(format!(
            "{name}_min_secs ({min}) exceeds {name}_max_secs ({max})"
        )));
    }
    Ok(())
}

/// HTTP client, retry and throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderConfig {
    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Total attempts per page, including the first one
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Lower bound of the base retry interval
    #[serde(default = "defaults::delay_min")]
    pub retry_delay_min_secs: f64,

    /// Upper bound of the base retry interval
    #[serde(default = "defaults::delay_max")]
    pub retry_delay_max_secs: f64,

    /// Lower bound of the pause between targets
    #[serde(default = "defaults::delay_min")]
    pub request_delay_min_secs: f64,

    /// Upper bound of the pause between targets
    #[serde(default = "defaults::delay_max")]
    pub request_delay_max_secs: f64,

    /// Route requests through a random proxy from the pool
    #[serde(default)]
    pub use_proxy: bool,

    /// Inline proxy endpoints (`host:port` or full URLs)
    #[serde(default)]
    pub proxies: Vec<String>,

    /// Optional file with one proxy per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_file: Option<PathBuf>,

    /// Replaces the built-in User-Agent pool when non-empty
    #[serde(default)]
    pub user_agents: Vec<String>,

    /// Accept-Language header sent with every identity
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Seconds to let a rendered page settle before reading it
    #[serde(default = "defaults::render_settle")]
    pub render_settle_secs: u64,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout(),
            max_attempts: defaults::max_attempts(),
            retry_delay_min_secs: defaults::delay_min(),
            retry_delay_max_secs: defaults::delay_max(),
            request_delay_min_secs: defaults::delay_min(),
            request_delay_max_secs: defaults::delay_max(),
            use_proxy: false,
            proxies: Vec::new(),
            proxy_file: None,
            user_agents: Vec::new(),
            accept_language: defaults::accept_language(),
            render_settle_secs: defaults::render_settle(),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "defaults::db_path")]
    pub path: PathBuf,

    /// Records and check logs older than this are pruned after each run
    #[serde(default = "defaults::keep_days")]
    pub keep_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: defaults::db_path(),
            keep_days: defaults::keep_days(),
        }
    }
}

/// A daily wall-clock trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTime {
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

/// Recurring schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Times of day at which a full cycle runs
    #[serde(default = "defaults::check_times")]
    pub check_times: Vec<CheckTime>,

    /// Fixed offset the check times are expressed in, e.g. `+08:00`
    #[serde(default = "defaults::utc_offset")]
    pub utc_offset: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_times: defaults::check_times(),
            utc_offset: defaults::utc_offset(),
        }
    }
}

impl ScheduleConfig {
    /// Parse `utc_offset` (`+HH:MM`, `-HH:MM` or `Z`).
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    fn validate(&self) -> Result<()> {
        self.offset()?;
        if self.check_times.is_empty() {
            return Err(AppError::validation("schedule.check_times is empty"));
        }
        for t in &self.check_times {
            if t.hour > 23 || t.minute > 59 {
                return Err(AppError::validation(format!(
                    "schedule time {:02}:{:02} is out of range",
                    t.hour, t.minute
                )));
            }
        }
        Ok(())
    }
}

/// Parse a fixed UTC offset such as `+08:00`, `-0530` or `Z`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    let invalid = || AppError::validation(format!("invalid utc offset '{s}'"));

    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match s.chars().next() {
        Some('+') => (1, &s[1..]),
        Some('-') => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Notification transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Write the digest to the log
    #[default]
    Log,
    /// POST the digest as JSON
    Webhook,
    /// Mail the digest over SMTP
    Email,
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,

    /// Endpoint for the webhook transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// SMTP relay host for the email transport
    #[serde(default = "defaults::smtp_server")]
    pub smtp_server: String,

    #[serde(default = "defaults::smtp_port")]
    pub smtp_port: u16,

    /// Implicit TLS when true, STARTTLS otherwise
    #[serde(default = "defaults::use_ssl")]
    pub use_ssl: bool,

    /// From address, also the SMTP login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// SMTP password or app token
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,

    /// Prefix of the digest subject line
    #[serde(default = "defaults::subject_prefix")]
    pub subject_prefix: String,

    /// Delivery attempts before the batch is reported as failed
    #[serde(default = "defaults::max_retry")]
    pub max_retry: u32,

    /// Pause between delivery attempts
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_secs: u64,

    /// Line template for one entry.
    ///
    /// Placeholders: `{target}`, `{target_url}`, `{title}`, `{url}`,
    /// `{location}`, `{detail}`, `{found_time}`
    #[serde(default = "defaults::entry_template")]
    pub template: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::default(),
            webhook_url: None,
            smtp_server: defaults::smtp_server(),
            smtp_port: defaults::smtp_port(),
            use_ssl: defaults::use_ssl(),
            sender: None,
            password: None,
            receiver: None,
            subject_prefix: defaults::subject_prefix(),
            max_retry: defaults::max_retry(),
            retry_delay_secs: defaults::retry_delay(),
            template: defaults::entry_template(),
        }
    }
}

impl NotifierConfig {
    fn validate(&self) -> Result<()> {
        if self.max_retry == 0 {
            return Err(AppError::validation("notifier.max_retry must be > 0"));
        }
        if self.kind == NotifierKind::Webhook {
            let url = self
                .webhook_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| AppError::validation("notifier.webhook_url is required"))?;
            url::Url::parse(url)?;
        }
        if self.kind == NotifierKind::Email {
            if self.smtp_server.trim().is_empty() {
                return Err(AppError::validation("notifier.smtp_server is empty"));
            }
            if self.smtp_port == 0 {
                return Err(AppError::validation("notifier.smtp_port must be > 0"));
            }
            self.sender_mailbox()?;
            self.receiver_mailbox()?;
            if self.password.as_deref().is_none_or(str::is_empty) {
                return Err(AppError::validation("notifier.password is required"));
            }
        }
        Ok(())
    }

    pub fn sender_mailbox(&self) -> Result<Mailbox> {
        parse_mailbox("notifier.sender", self.sender.as_deref())
    }

    pub fn receiver_mailbox(&self) -> Result<Mailbox> {
        parse_mailbox("notifier.receiver", self.receiver.as_deref())
    }
}

fn parse_mailbox(field: &str, value: Option<&str>) -> Result<Mailbox> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::validation(format!("{field} is required")))?;
    value
        .parse()
        .map_err(|e| AppError::validation(format!("{field} '{value}' is not an address: {e}")))
}

mod defaults {
    use std::path::PathBuf;

    use super::CheckTime;

    // Spider defaults
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn delay_min() -> f64 {
        2.0
    }
    pub fn delay_max() -> f64 {
        5.0
    }
    pub fn accept_language() -> String {
        "zh-CN,zh;q=0.9,en;q=0.8".into()
    }
    pub fn render_settle() -> u64 {
        5
    }

    // Database defaults
    pub fn db_path() -> PathBuf {
        PathBuf::from("data/jobs.db")
    }
    pub fn keep_days() -> u32 {
        30
    }

    // Schedule defaults
    pub fn check_times() -> Vec<CheckTime> {
        vec![
            CheckTime { hour: 13, minute: 0 },
            CheckTime { hour: 19, minute: 0 },
        ]
    }
    pub fn utc_offset() -> String {
        "+08:00".into()
    }

    // Notifier defaults
    pub fn smtp_server() -> String {
        "smtp.qq.com".into()
    }
    pub fn smtp_port() -> u16 {
        465
    }
    pub fn use_ssl() -> bool {
        true
    }
    pub fn subject_prefix() -> String {
        "[jobwatch] ".into()
    }
    pub fn max_retry() -> u32 {
        3
    }
    pub fn retry_delay() -> u64 {
        5
    }
    pub fn entry_template() -> String {
        "- {title} | {location} | {detail} | {url}".into()
    }
}
