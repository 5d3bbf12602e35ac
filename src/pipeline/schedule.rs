// src/pipeline/schedule.rs

//! Recurring and one-shot execution of monitoring cycles.
//!
//! Daily check times are configured as wall-clock times in a fixed UTC
//! offset and converted to UTC cron expressions for the scheduler.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{CheckTime, ScheduleConfig};
use crate::pipeline::{CycleReport, Monitor};

const MINUTES_PER_DAY: i32 = 24 * 60;

/// Six-field UTC cron expression firing daily at `time` in `offset`.
pub fn cron_expression(time: CheckTime, offset: FixedOffset) -> String {
    let local = (time.hour * 60 + time.minute) as i32;
    let utc = (local - offset.local_minus_utc() / 60).rem_euclid(MINUTES_PER_DAY);
    format!("0 {} {} * * *", utc % 60, utc / 60)
}

/// Next instant, strictly after `now`, at which one of `times` occurs.
pub fn next_trigger(
    now: DateTime<Utc>,
    times: &[CheckTime],
    offset: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    let local_now = now.with_timezone(&offset);
    let today = local_now.date_naive();

    times
        .iter()
        .filter_map(|t| NaiveTime::from_hms_opt(t.hour, t.minute, 0))
        .flat_map(|time| {
            [today, today + Duration::days(1)]
                .into_iter()
                .filter_map(move |day| day.and_time(time).and_local_timezone(offset).single())
        })
        .filter(|candidate| *candidate > local_now)
        .min()
}

fn format_time(time: CheckTime) -> String {
    format!("{:02}:{:02}", time.hour, time.minute)
}

/// Run exactly one cycle.
pub async fn run_once(monitor: &Monitor) -> CycleReport {
    monitor.run_cycle().await
}

/// Fire a cycle at every configured check time until `cancel` fires.
///
/// A trigger that arrives while a cycle is still running is dropped.
pub async fn run_scheduled(
    monitor: Arc<Monitor>,
    schedule: &ScheduleConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let offset = schedule.offset()?;
    let mut scheduler = JobScheduler::new().await.map_err(AppError::schedule)?;

    for &time in &schedule.check_times {
        let expression = cron_expression(time, offset);
        let label = format_time(time);
        let job_monitor = Arc::clone(&monitor);

        let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
            let monitor = Arc::clone(&job_monitor);
            let label = label.clone();
            Box::pin(async move {
                log::info!("Scheduled check {label} triggered");
                if monitor.try_run_cycle().await.is_none() {
                    log::warn!("Previous cycle still running; dropping the {label} trigger");
                }
            })
        })
        .map_err(AppError::schedule)?;

        scheduler.add(job).await.map_err(AppError::schedule)?;
        log::info!(
            "Daily check at {} ({offset}), cron '{expression}' UTC",
            format_time(time)
        );
    }

    scheduler.start().await.map_err(AppError::schedule)?;
    if let Some(next) = next_trigger(Utc::now(), &schedule.check_times, offset) {
        log::info!("Next check at {}", next.format("%Y-%m-%d %H:%M %:z"));
    }

    cancel.cancelled().await;

    log::info!("Shutting down scheduler");
    scheduler.shutdown().await.map_err(AppError::schedule)?;
    monitor.wait_idle().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> CheckTime {
        CheckTime { hour, minute }
    }

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn cron_converts_local_time_to_utc() {
        assert_eq!(cron_expression(at(13, 0), offset(8)), "0 0 5 * * *");
        assert_eq!(cron_expression(at(19, 30), offset(8)), "0 30 11 * * *");
        assert_eq!(cron_expression(at(12, 0), offset(0)), "0 0 12 * * *");
    }

    #[test]
    fn cron_wraps_across_midnight() {
        assert_eq!(cron_expression(at(3, 15), offset(8)), "0 15 19 * * *");
        assert_eq!(cron_expression(at(22, 0), offset(-5)), "0 0 3 * * *");
    }

    #[test]
    fn next_trigger_picks_earliest_upcoming_time() {
        let times = [at(13, 0), at(19, 0)];
        let tz = offset(8);

        // 10:00 local
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 2, 0, 0).unwrap();
        let next = next_trigger(now, &times, tz).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 4, 1, 13, 0, 0).unwrap());

        // 20:00 local rolls over to tomorrow
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let next = next_trigger(now, &times, tz).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 4, 2, 13, 0, 0).unwrap());

        // exactly on a trigger: the next one
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 5, 0, 0).unwrap();
        let next = next_trigger(now, &times, tz).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 4, 1, 19, 0, 0).unwrap());
    }

    #[test]
    fn next_trigger_without_times_is_none() {
        assert!(next_trigger(Utc::now(), &[], offset(0)).is_none());
    }
}
