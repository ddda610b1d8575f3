//! Periodic background work.
//!
//! - [`Reconciler`] pulls backend state into the repository
//! - [`ScheduleTrigger`] fires backup and snapshot schedules
//! - [`ExpiredResourceCleaner`] deletes backups and snapshots past retention
//! - [`StuckResourceSweeper`] errs resources stuck in CREATING
//!
//! [`BackgroundRunner`] drives all of them on tokio intervals.

mod expiry;
mod reconcile;
mod runner;
mod schedules;
mod stuck;

pub use expiry::{ExpiredResourceCleaner, ExpiryReport};
pub use reconcile::{ReconcileReport, Reconciler, MISSING_AT_BACKEND};
pub use runner::{
    BackgroundConfig, BackgroundRunner, DEFAULT_EXPIRY_INTERVAL_SECS,
    DEFAULT_RECONCILE_INTERVAL_SECS, DEFAULT_SCHEDULE_INTERVAL_SECS, DEFAULT_STUCK_INTERVAL_SECS,
    DEFAULT_STUCK_TIMEOUT_MINS,
};
pub use schedules::{ScheduleTrigger, TriggerReport};
pub use stuck::{StuckResourceSweeper, PROVISIONING_TIMED_OUT};
