//! jobwatch CLI
//!
//! Local execution entry point: recurring scheduler, one-shot runs and
//! store inspection.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use jobwatch::{
    error::Result,
    models::{Config, NotifierKind},
    pipeline::{self, Monitor},
    services::{Notifier, build_notifier, sample_batch},
    storage::{RecordStore, SqliteStore},
};
use tokio_util::sync::CancellationToken;

/// jobwatch - career page monitor
#[derive(Parser, Debug)]
#[command(
    name = "jobwatch",
    version,
    about = "Watches career pages and reports new listings"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run checks at the configured daily times until interrupted
    Run {
        /// Also run one cycle immediately on start
        #[arg(long)]
        now: bool,
    },

    /// Run a single check cycle and exit
    Once,

    /// Show store statistics
    Stats,

    /// List listings found within the last N hours
    Recent {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Show targets, schedule and notifier settings
    Info,

    /// Validate the configuration file
    Validate,

    /// Send a sample batch through the configured notifier
    TestNotify,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel `token` on Ctrl-C.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, finishing up...");
            token.cancel();
        }
    });
}

async fn log_statistics(config: &Config, store: &dyn RecordStore) -> Result<()> {
    let stats = store.statistics(config.schedule.offset()?).await?;
    log::info!("Total listings: {}", stats.total);
    log::info!("Found today: {}", stats.today);
    for (target, count) in &stats.by_target {
        log::info!("  {target}: {count}");
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("jobwatch starting...");

    let config = Config::load_validated(&cli.config).inspect_err(|e| {
        log::error!("Config validation failed: {e}");
    })?;
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Run { now } => {
            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());

            let monitor = Arc::new(Monitor::from_config(&config, cancel.clone()).await?);
            log_statistics(&config, monitor.store().as_ref()).await?;

            if now {
                pipeline::run_once(&monitor).await;
            }
            pipeline::run_scheduled(Arc::clone(&monitor), &config.schedule, cancel).await?;
        }

        Command::Once => {
            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());

            let monitor = Monitor::from_config(&config, cancel).await?;
            let report = pipeline::run_once(&monitor).await;
            if report.failed_targets() > 0 {
                log::warn!(
                    "{} of {} targets failed",
                    report.failed_targets(),
                    report.targets.len()
                );
            }
        }

        Command::Stats => {
            let store = SqliteStore::open(&config.database.path).await?;
            log_statistics(&config, &store).await?;

            let offset = config.schedule.offset()?;
            let checks = store.recent_checks(10).await?;
            if !checks.is_empty() {
                log::info!("Latest checks:");
            }
            for check in checks {
                log::info!(
                    "  {} {} found={} new={} {}{}",
                    check.checked_at.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
                    check.target,
                    check.found,
                    check.new,
                    check.outcome,
                    if check.error.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", check.error)
                    }
                );
            }
        }

        Command::Recent { hours } => {
            let store = SqliteStore::open(&config.database.path).await?;
            let offset = config.schedule.offset()?;
            let records = store.recent(hours).await?;
            log::info!("{} listings found in the last {hours}h", records.len());
            for record in records {
                log::info!(
                    "  [{}] {} | {} | {}{}",
                    record.target,
                    record.title,
                    record.url,
                    record.found_at.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
                    if record.notified { "" } else { " (pending)" }
                );
            }
        }

        Command::Info => {
            log::info!("Database: {}", config.database.path.display());
            log::info!("Retention: {} days", config.database.keep_days);
            log::info!(
                "Check times ({}): {}",
                config.schedule.utc_offset,
                config
                    .schedule
                    .check_times
                    .iter()
                    .map(|t| format!("{:02}:{:02}", t.hour, t.minute))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            log::info!("Notifier: {:?}", config.notifier.kind);
            if config.notifier.kind == NotifierKind::Email {
                log::info!(
                    "  {}:{} ({}) -> {}",
                    config.notifier.smtp_server,
                    config.notifier.smtp_port,
                    if config.notifier.use_ssl { "ssl" } else { "starttls" },
                    config.notifier.receiver.as_deref().unwrap_or("-")
                );
            }
            log::info!("Targets:");
            for target in &config.targets {
                log::info!(
                    "  [{}] {} ({:?}) {}",
                    if target.enabled { "x" } else { " " },
                    target.name,
                    target.selectors.strategy,
                    target.url
                );
            }
        }

        Command::Validate => {
            log::info!(
                "✓ Config OK ({} targets, {} enabled)",
                config.targets.len(),
                config.enabled_targets().count()
            );
        }

        Command::TestNotify => {
            let notifier = build_notifier(&config.notifier, config.schedule.offset()?)?;
            notifier.notify(&sample_batch()).await?;
            log::info!("Test notification sent via {}", notifier.name());
        }
    }

    log::info!("Done!");

    Ok(())
}
