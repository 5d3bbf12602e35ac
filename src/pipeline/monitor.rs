// src/pipeline/monitor.rs

//! One monitoring cycle: check every enabled target in order, persist new
//! listings, deliver the pending batch, then apply retention.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{CheckLog, Config, ListingEntry, NewJob, NotifyEntry, Target};
use crate::services::{
    IdentityProvider, ListingExtractor, ListingSource, Notifier, build_notifier, default_renderer,
};
use crate::storage::{PruneCount, RecordStore, SqliteStore};
use crate::utils::log as console;
use crate::utils::{RandomSource, ThreadRandom, random_delay};

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running,
    Notifying,
    Pruning,
}

/// What happened to the pending batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Nothing was pending
    Skipped,
    /// Delivered and marked
    Delivered(usize),
    /// Delivery or store access failed; records stay pending
    Failed(String),
}

/// Result of checking one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    pub found: usize,
    pub new: usize,
    pub error: Option<String>,
}

/// Summary of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<TargetReport>,
    /// Listings persisted during this cycle
    pub new_entries: Vec<NotifyEntry>,
    pub notify: NotifyOutcome,
    pub pruned: PruneCount,
    /// Shutdown was requested before the cycle completed
    pub cancelled: bool,
}

impl CycleReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            targets: Vec::new(),
            new_entries: Vec::new(),
            notify: NotifyOutcome::Skipped,
            pruned: PruneCount::default(),
            cancelled: false,
        }
    }

    pub fn failed_targets(&self) -> usize {
        self.targets.iter().filter(|t| t.error.is_some()).count()
    }

    pub fn total_found(&self) -> usize {
        self.targets.iter().map(|t| t.found).sum()
    }
}

/// Runs monitoring cycles against injected collaborators.
pub struct Monitor {
    targets: Vec<Target>,
    target_urls: HashMap<String, String>,
    source: Arc<dyn ListingSource>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    rng: Arc<dyn RandomSource>,
    request_delay: (f64, f64),
    keep_days: u32,
    cancel: CancellationToken,
    state: Mutex<CycleState>,
    running: tokio::sync::Mutex<()>,
}

impl Monitor {
    pub fn new(
        config: &Config,
        source: Arc<dyn ListingSource>,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        let target_urls = config
            .targets
            .iter()
            .map(|t| (t.name.clone(), t.url.clone()))
            .collect();

        Self {
            targets: config.enabled_targets().cloned().collect(),
            target_urls,
            source,
            store,
            notifier,
            rng,
            request_delay: (
                config.spider.request_delay_min_secs,
                config.spider.request_delay_max_secs,
            ),
            keep_days: config.database.keep_days,
            cancel: CancellationToken::new(),
            state: Mutex::new(CycleState::Idle),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire the production collaborators described by `config`.
    pub async fn from_config(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let rng: Arc<dyn RandomSource> = Arc::new(ThreadRandom);
        let identities = Arc::new(IdentityProvider::new(&config.spider, Arc::clone(&rng))?);
        if config.spider.use_proxy {
            log::info!("Proxy rotation enabled ({} endpoints)", identities.proxy_count());
        }

        let extractor = ListingExtractor::new(
            config.spider.clone(),
            identities,
            default_renderer(),
            Arc::clone(&rng),
        )?
        .with_cancellation(cancel.clone());
        let store = Arc::new(SqliteStore::open(&config.database.path).await?);
        let notifier = build_notifier(&config.notifier, config.schedule.offset()?)?;

        Ok(Self::new(config, Arc::new(extractor), store, notifier, rng).with_cancellation(cancel))
    }

    /// Stop between targets and skip delivery once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    fn set_state(&self, state: CycleState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Run a cycle unless one is already in progress, in which case `None`.
    pub async fn try_run_cycle(&self) -> Option<CycleReport> {
        let _guard = self.running.try_lock().ok()?;
        Some(self.cycle().await)
    }

    /// Run a cycle, waiting for an in-progress one to finish first.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.running.lock().await;
        self.cycle().await
    }

    /// Resolves once no cycle is running.
    pub async fn wait_idle(&self) {
        drop(self.running.lock().await);
    }

    async fn cycle(&self) -> CycleReport {
        let mut report = CycleReport::new();
        console::header(&format!("Checking {} targets", self.targets.len()));
        self.set_state(CycleState::Running);

        for (index, target) in self.targets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            console::step(index + 1, self.targets.len(), &target.name);
            let (target_report, entries) = self.check_target(target).await;
            report.targets.push(target_report);
            report.new_entries.extend(entries);

            if index + 1 < self.targets.len() && !self.pause_between_targets().await {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            log::warn!("Shutdown requested; leaving pending listings for the next run");
        } else {
            self.set_state(CycleState::Notifying);
            report.notify = self.deliver_pending().await;

            self.set_state(CycleState::Pruning);
            report.pruned = self.prune().await;
        }

        self.set_state(CycleState::Idle);
        report.finished_at = Utc::now();
        log_report(&report);
        report
    }

    /// Check one target. Every failure is contained here and recorded as an
    /// `error` check log.
    async fn check_target(&self, target: &Target) -> (TargetReport, Vec<NotifyEntry>) {
        let outcome = match self.source.fetch_listings(target).await {
            Ok(listings) => self
                .store_new(target, &listings)
                .await
                .map(|entries| (listings.len(), entries)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((found, entries)) => {
                log::info!("{}: {} listings, {} new", target.name, found, entries.len());
                self.record_check(CheckLog::success(&target.name, found, entries.len()))
                    .await;
                let report = TargetReport {
                    target: target.name.clone(),
                    found,
                    new: entries.len(),
                    error: None,
                };
                (report, entries)
            }
            Err(e) => {
                log::error!("{}: check failed: {e}", target.name);
                self.record_check(CheckLog::failure(&target.name, &e)).await;
                let report = TargetReport {
                    target: target.name.clone(),
                    found: 0,
                    new: 0,
                    error: Some(e.to_string()),
                };
                (report, Vec::new())
            }
        }
    }

    /// Persist unseen listings; only rows actually inserted count as new.
    async fn store_new(&self, target: &Target, listings: &[ListingEntry]) -> Result<Vec<NotifyEntry>> {
        let mut fresh = Vec::new();

        for listing in listings {
            let (is_new, fingerprint) = self
                .store
                .is_new(&target.name, &listing.title, &listing.url)
                .await?;
            if !is_new {
                continue;
            }

            let job = NewJob {
                target: target.name.clone(),
                title: listing.title.clone(),
                url: listing.url.clone(),
                fingerprint,
                location: listing.location.clone(),
                detail: listing.detail.clone(),
                found_at: Utc::now(),
            };
            if self.store.save(&job).await? {
                log::debug!("{}: new listing '{}'", target.name, job.title);
                fresh.push(NotifyEntry {
                    id: 0,
                    target: job.target,
                    target_url: target.url.clone(),
                    title: job.title,
                    url: job.url,
                    location: job.location,
                    detail: job.detail,
                    found_time: job.found_at,
                });
            }
        }

        Ok(fresh)
    }

    async fn record_check(&self, entry: CheckLog) {
        if let Err(e) = self.store.log_check(&entry).await {
            log::error!("Could not record check for {}: {e}", entry.target);
        }
    }

    /// Randomized throttle between targets. `false` if shutdown interrupted it.
    async fn pause_between_targets(&self) -> bool {
        let (min, max) = self.request_delay;
        let delay = random_delay(self.rng.as_ref(), min, max);
        log::debug!("Waiting {:.1}s before the next target", delay.as_secs_f64());

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Hand every pending record to the notifier; mark them only on success.
    async fn deliver_pending(&self) -> NotifyOutcome {
        let pending = match self.store.unnotified_new().await {
            Ok(pending) => pending,
            Err(e) => {
                log::error!("Could not load pending listings: {e}");
                return NotifyOutcome::Failed(e.to_string());
            }
        };
        if pending.is_empty() {
            log::info!("No pending listings to notify");
            return NotifyOutcome::Skipped;
        }

        let batch: Vec<NotifyEntry> = pending
            .iter()
            .map(|record| {
                let url = self.target_urls.get(&record.target).cloned().unwrap_or_default();
                NotifyEntry::from_record(record, url)
            })
            .collect();

        log::info!(
            "Sending {} pending listings via {}",
            batch.len(),
            self.notifier.name()
        );
        if let Err(e) = self.notifier.notify(&batch).await {
            log::error!("Notification failed, {} listings stay pending: {e}", batch.len());
            return NotifyOutcome::Failed(e.to_string());
        }

        let ids: Vec<i64> = pending.iter().map(|r| r.id).collect();
        match self.store.mark_notified(&ids).await {
            Ok(_) => NotifyOutcome::Delivered(batch.len()),
            Err(e) => {
                log::error!("Delivered but could not mark {} listings: {e}", ids.len());
                NotifyOutcome::Failed(e.to_string())
            }
        }
    }

    async fn prune(&self) -> PruneCount {
        match self.store.prune(self.keep_days).await {
            Ok(count) => {
                if count.jobs > 0 || count.check_logs > 0 {
                    log::info!(
                        "Pruned {} listings and {} check logs older than {} days",
                        count.jobs,
                        count.check_logs,
                        self.keep_days
                    );
                }
                count
            }
            Err(e) => {
                log::error!("Retention prune failed: {e}");
                PruneCount::default()
            }
        }
    }
}

fn log_report(report: &CycleReport) {
    let elapsed = report.finished_at - report.started_at;
    let notify = match &report.notify {
        NotifyOutcome::Skipped => "nothing pending".to_string(),
        NotifyOutcome::Delivered(n) => format!("{n} delivered"),
        NotifyOutcome::Failed(e) => format!("failed ({e})"),
    };

    console::summary(
        if report.cancelled { "Cycle interrupted" } else { "Cycle complete" },
        &[
            ("targets", report.targets.len().to_string()),
            ("failed", report.failed_targets().to_string()),
            ("found", report.total_found().to_string()),
            ("new", report.new_entries.len().to_string()),
            ("notify", notify),
            ("elapsed", format!("{:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)),
        ],
    );
    for target in &report.targets {
        if let Some(error) = &target.error {
            console::sub_item(&format!("{}: {error}", target.target));
        }
    }
}
