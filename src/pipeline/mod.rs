//! Pipeline entry points for monitoring operations.
//!
//! - `Monitor`: one full check → notify → prune cycle
//! - `run_once`: run a single cycle now
//! - `run_scheduled`: run cycles at the configured daily check times

pub mod monitor;
pub mod schedule;

pub use monitor::{CycleReport, CycleState, Monitor, NotifyOutcome, TargetReport};
pub use schedule::{cron_expression, next_trigger, run_once, run_scheduled};
