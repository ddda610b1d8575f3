//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use crate::model::ResourceKind;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub executor: ExecutorSettings,
    /// Concurrent-create limits
    pub throttle: ThrottleSettings,
    pub poll: PollSettings,
    /// Chain countdowns
    pub timings: TimingSettings,
    pub background: BackgroundSettings,
    pub logging: LoggingSettings,
}

/// Executor daemon settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub max_concurrent_tasks: usize,
    pub job_channel_capacity: usize,
    /// Concurrent backend calls.
    pub backend_concurrent: usize,
    /// Concurrent repository-only tasks.
    pub repository_concurrent: usize,
}

/// Provisioning throttle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Limit for kinds without their own key; `0` is unlimited.
    pub default_limit: usize,
    pub per_kind: BTreeMap<ResourceKind, usize>,
}

/// Backend poll budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub check_max_retries: u32,
    pub check_retry_delay_secs: u64,
    pub throttle_retry_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSettings {
    pub volume_poll_countdown_secs: u64,
    pub snapshot_poll_countdown_secs: u64,
    pub instance_settle_secs: u64,
    pub floating_ip_poll_countdown_secs: u64,
}

/// Background sweep intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundSettings {
    pub reconcile_interval_secs: u64,
    pub schedule_interval_secs: u64,
    pub expiry_interval_secs: u64,
    pub stuck_interval_secs: u64,
    /// Minutes a resource may stay CREATING before it is erred.
    pub stuck_timeout_mins: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}
