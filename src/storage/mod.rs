// src/storage/mod.rs

//! Record store abstractions.
//!
//! The store owns every persisted listing and check log. Uniqueness of the
//! listing fingerprint is enforced by the backend itself, so `is_new` followed
//! by `save` stays correct even when two writers race between the calls.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::error::Result;
use crate::models::{CheckLog, JobRecord, NewJob, RunStatistics};
use crate::utils::fingerprint;

// Re-export for convenience
pub use sqlite::SqliteStore;

/// Rows removed by a retention prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneCount {
    pub jobs: u64,
    pub check_logs: u64,
}

/// Trait for record store backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether a record with this fingerprint exists.
    async fn contains(&self, fingerprint: &str) -> Result<bool>;

    /// Insert a record. `false` when the fingerprint is already present.
    async fn save(&self, job: &NewJob) -> Result<bool>;

    /// Records with status `new` and not yet notified, most recent first.
    async fn unnotified_new(&self) -> Result<Vec<JobRecord>>;

    /// Move records to `processed` and flag them notified.
    async fn mark_notified(&self, ids: &[i64]) -> Result<u64>;

    /// Append one check log row.
    async fn log_check(&self, log: &CheckLog) -> Result<()>;

    /// Latest check logs, newest first.
    async fn recent_checks(&self, limit: u32) -> Result<Vec<CheckLog>>;

    /// Records first seen at or after `since`, newest first.
    async fn found_since(&self, since: DateTime<Utc>) -> Result<Vec<JobRecord>>;

    /// Counters; "today" starts at `day_start`.
    async fn statistics_since(&self, day_start: DateTime<Utc>) -> Result<RunStatistics>;

    /// Delete records and check logs strictly older than `cutoff`.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneCount>;

    /// Fingerprint a triple and report whether it is unseen.
    async fn is_new(&self, target: &str, title: &str, url: &str) -> Result<(bool, String)> {
        let fp = fingerprint(target, title, url);
        let exists = self.contains(&fp).await?;
        Ok((!exists, fp))
    }

    /// Counters with "today" measured in the given offset's calendar day.
    async fn statistics(&self, offset: FixedOffset) -> Result<RunStatistics> {
        self.statistics_since(local_day_start(Utc::now(), offset)).await
    }

    /// Apply the retention window ending now.
    async fn prune(&self, keep_days: u32) -> Result<PruneCount> {
        self.prune_before(Utc::now() - Duration::days(i64::from(keep_days)))
            .await
    }

    /// Records first seen within the last `hours`.
    async fn recent(&self, hours: u32) -> Result<Vec<JobRecord>> {
        self.found_since(Utc::now() - Duration::hours(i64::from(hours)))
            .await
    }
}

/// Midnight of `now`'s calendar day in `offset`, as UTC.
pub fn local_day_start(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap_or(local.naive_local());
    midnight
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_start_follows_offset() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        // 2026-03-01 20:30 UTC is already 2026-03-02 04:30 at +08:00
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 20, 30, 0).unwrap();
        assert_eq!(
            local_day_start(now, offset),
            Utc.with_ymd_and_hms(2026, 3, 1, 16, 0, 0).unwrap()
        );

        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(
            local_day_start(now, utc),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
        );
    }
}
