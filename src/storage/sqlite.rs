// src/storage/sqlite.rs

//! SQLite record store.
//!
//! Two tables: `jobs` (unique on `fingerprint`) and the append-only
//! `check_logs`. Timestamps are stored as UTC unix milliseconds.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::error::Result;
use crate::models::{CheckLog, CheckOutcome, JobRecord, JobStatus, NewJob, RunStatistics};
use crate::storage::{PruneCount, RecordStore};

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        log::debug!("Opened record store at {}", path.display());
        Self::with_pool(pool).await
    }

    /// Ephemeral store for tests and dry runs.
    ///
    /// Pinned to one connection that never expires: each SQLite memory
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL UNIQUE,
                target TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                detail TEXT NOT NULL DEFAULT '',
                found_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                notified INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_found_at ON jobs(found_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(status, notified)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS check_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target TEXT NOT NULL,
                checked_at INTEGER NOT NULL,
                found_count INTEGER NOT NULL DEFAULT 0,
                new_count INTEGER NOT NULL DEFAULT 0,
                outcome TEXT NOT NULL,
                error TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_check_logs_checked_at ON check_logs(checked_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    fingerprint: String,
    target: String,
    title: String,
    url: String,
    location: String,
    detail: String,
    found_at: i64,
    status: String,
    notified: bool,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        JobRecord {
            id: row.id,
            fingerprint: row.fingerprint,
            target: row.target,
            title: row.title,
            url: row.url,
            location: row.location,
            detail: row.detail,
            found_at: from_millis(row.found_at),
            status: JobStatus::parse(&row.status).unwrap_or(JobStatus::New),
            notified: row.notified,
        }
    }
}

#[derive(Debug, FromRow)]
struct CheckLogRow {
    target: String,
    checked_at: i64,
    found_count: i64,
    new_count: i64,
    outcome: String,
    error: String,
}

impl From<CheckLogRow> for CheckLog {
    fn from(row: CheckLogRow) -> Self {
        CheckLog {
            target: row.target,
            checked_at: from_millis(row.checked_at),
            found: u32::try_from(row.found_count).unwrap_or_default(),
            new: u32::try_from(row.new_count).unwrap_or_default(),
            outcome: CheckOutcome::parse(&row.outcome).unwrap_or(CheckOutcome::Error),
            error: row.error,
        }
    }
}

const JOB_COLUMNS: &str =
    "id, fingerprint, target, title, url, location, detail, found_at, status, notified";

#[async_trait]
impl RecordStore for SqliteStore {
    async fn contains(&self, fingerprint: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn save(&self, job: &NewJob) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO jobs
                (fingerprint, target, title, url, location, detail, found_at, status, notified)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&job.fingerprint)
        .bind(&job.target)
        .bind(&job.title)
        .bind(&job.url)
        .bind(&job.location)
        .bind(&job.detail)
        .bind(job.found_at.timestamp_millis())
        .bind(JobStatus::New.as_str())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            log::debug!("Fingerprint {} already stored", job.fingerprint);
        }
        Ok(inserted)
    }

    async fn unnotified_new(&self) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = ? AND notified = 0 \
             ORDER BY found_at DESC, id DESC"
        ))
        .bind(JobStatus::New.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(JobRecord::from).collect())
    }

    async fn mark_notified(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET status = ");
        builder.push_bind(JobStatus::Processed.as_str());
        builder.push(", notified = 1 WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn log_check(&self, log: &CheckLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO check_logs (target, checked_at, found_count, new_count, outcome, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.target)
        .bind(log.checked_at.timestamp_millis())
        .bind(i64::from(log.found))
        .bind(i64::from(log.new))
        .bind(log.outcome.as_str())
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_checks(&self, limit: u32) -> Result<Vec<CheckLog>> {
        let rows: Vec<CheckLogRow> = sqlx::query_as(
            r#"
            SELECT target, checked_at, found_count, new_count, outcome, error
            FROM check_logs
            ORDER BY checked_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CheckLog::from).collect())
    }

    async fn found_since(&self, since: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE found_at >= ? ORDER BY found_at DESC, id DESC"
        ))
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(JobRecord::from).collect())
    }

    async fn statistics_since(&self, day_start: DateTime<Utc>) -> Result<RunStatistics> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        let today: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE found_at >= ?")
            .bind(day_start.timestamp_millis())
            .fetch_one(&self.pool)
            .await?;
        let by_target: Vec<(String, i64)> = sqlx::query_as(
            "SELECT target, COUNT(*) AS n FROM jobs GROUP BY target ORDER BY n DESC, target ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(RunStatistics {
            total: total.max(0) as u64,
            today: today.max(0) as u64,
            by_target: by_target
                .into_iter()
                .map(|(target, n)| (target, n.max(0) as u64))
                .collect(),
        })
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneCount> {
        let cutoff = cutoff.timestamp_millis();

        let jobs = sqlx::query("DELETE FROM jobs WHERE found_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let check_logs = sqlx::query("DELETE FROM check_logs WHERE checked_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(PruneCount { jobs, check_logs })
    }
}
