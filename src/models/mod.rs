// src/models/mod.rs

//! Domain models for the monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod listing;
mod selectors;
mod target;

// Re-export all public types
pub use config::{
    CheckTime, Config, DatabaseConfig, NotifierConfig, NotifierKind, ScheduleConfig,
    SpiderConfig, parse_utc_offset,
};
pub use listing::{
    CheckLog, CheckOutcome, JobRecord, JobStatus, ListingEntry, NewJob, NotifyEntry,
    RunStatistics,
};
pub use selectors::{CompiledSelectors, FetchStrategy, ListingSelectors, parse_selector};
pub use target::Target;
