// src/models/listing.rs

//! Listing data structures, from a fresh page fetch to a persisted record.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// A listing parsed from a page. Lives for one fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingEntry {
    /// Trimmed, never empty
    pub title: String,

    /// Absolute URL of the listing
    pub url: String,

    /// Empty when not configured or not found
    pub location: String,

    /// Empty when not configured or not found
    pub detail: String,
}

/// Lifecycle status of a stored listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    New,
    Processed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(JobStatus::New),
            "processed" => Some(JobStatus::Processed),
            _ => None,
        }
    }
}

/// A listing about to be inserted into the record store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub target: String,
    pub title: String,
    pub url: String,
    pub fingerprint: String,
    pub location: String,
    pub detail: String,
    pub found_at: DateTime<Utc>,
}

/// A persisted listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub id: i64,
    pub fingerprint: String,
    pub target: String,
    pub title: String,
    pub url: String,
    pub location: String,
    pub detail: String,
    pub found_at: DateTime<Utc>,
    pub status: JobStatus,
    pub notified: bool,
}

/// Outcome of checking one target in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Success,
    Error,
}

impl CheckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckOutcome::Success => "success",
            CheckOutcome::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(CheckOutcome::Success),
            "error" => Some(CheckOutcome::Error),
            _ => None,
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only check log row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckLog {
    pub target: String,
    pub checked_at: DateTime<Utc>,
    pub found: u32,
    pub new: u32,
    pub outcome: CheckOutcome,
    pub error: String,
}

impl CheckLog {
    pub fn success(target: impl Into<String>, found: usize, new: usize) -> Self {
        Self {
            target: target.into(),
            checked_at: Utc::now(),
            found: found as u32,
            new: new as u32,
            outcome: CheckOutcome::Success,
            error: String::new(),
        }
    }

    pub fn failure(target: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            target: target.into(),
            checked_at: Utc::now(),
            found: 0,
            new: 0,
            outcome: CheckOutcome::Error,
            error: error.to_string(),
        }
    }
}

/// Store-wide counters, computed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatistics {
    pub total: u64,
    pub today: u64,
    /// Largest first
    pub by_target: Vec<(String, u64)>,
}

/// A listing as handed to the notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyEntry {
    /// Record id, used to mark the batch once delivered
    pub id: i64,
    pub target: String,
    pub target_url: String,
    pub title: String,
    pub url: String,
    pub location: String,
    pub detail: String,
    pub found_time: DateTime<Utc>,
}

impl NotifyEntry {
    /// Build from a stored record plus the page it was found on.
    pub fn from_record(record: &JobRecord, target_url: impl Into<String>) -> Self {
        Self {
            id: record.id,
            target: record.target.clone(),
            target_url: target_url.into(),
            title: record.title.clone(),
            url: record.url.clone(),
            location: record.location.clone(),
            detail: record.detail.clone(),
            found_time: record.found_at,
        }
    }

    /// Format entry for display using a template.
    ///
    /// Supported placeholders:
    /// - `{target}`, `{target_url}`, `{title}`, `{url}`
    /// - `{location}`, `{detail}`, `{found_time}`
    ///
    /// `{found_time}` is rendered in `offset`, the zone check times use.
    pub fn format(&self, template: &str, offset: FixedOffset) -> String {
        template
            .replace("{target}", &self.target)
            .replace("{target_url}", &self.target_url)
            .replace("{title}", &self.title)
            .replace("{url}", &self.url)
            .replace("{location}", &self.location)
            .replace("{detail}", &self.detail)
            .replace(
                "{found_time}",
                &self
                    .found_time
                    .with_timezone(&offset)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_entry() -> NotifyEntry {
        NotifyEntry {
            id: 1,
            target: "Acme".to_string(),
            target_url: "https://acme.example/careers".to_string(),
            title: "Backend Intern".to_string(),
            url: "https://acme.example/jobs/1".to_string(),
            location: "Beijing".to_string(),
            detail: "Platform".to_string(),
            found_time: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_format() {
        let entry = sample_entry();
        let utc = FixedOffset::east_opt(0).unwrap();
        let result = entry.format("[{target}] {title} @ {location} ({found_time})", utc);
        assert_eq!(result, "[Acme] Backend Intern @ Beijing (2026-01-02 03:04:05)");
    }

    #[test]
    fn test_found_time_uses_schedule_offset() {
        let entry = sample_entry();
        let beijing = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(entry.format("{found_time}", beijing), "2026-01-02 11:04:05");

        let west = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(entry.format("{found_time}", west), "2026-01-01 22:04:05");
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [JobStatus::New, JobStatus::Processed] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("archived"), None);
    }
}
