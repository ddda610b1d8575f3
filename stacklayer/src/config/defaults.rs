//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants and the `Default` implementations of
//! the settings structs.

use std::path::PathBuf;

use super::settings::*;
use crate::background;
use crate::chains::{
    DEFAULT_FLOATING_IP_POLL_COUNTDOWN, DEFAULT_INSTANCE_SETTLE, DEFAULT_SNAPSHOT_POLL_COUNTDOWN,
    DEFAULT_VOLUME_POLL_COUNTDOWN,
};
use crate::executor::{
    DEFAULT_BACKEND_CAPACITY, DEFAULT_JOB_CHANNEL_CAPACITY, DEFAULT_MAX_CONCURRENT_TASKS,
    DEFAULT_REPOSITORY_CAPACITY,
};
use crate::tasks::{
    DEFAULT_CHECK_MAX_RETRIES, DEFAULT_CHECK_RETRY_DELAY, DEFAULT_POLL_MAX_RETRIES,
    DEFAULT_POLL_RETRY_DELAY, DEFAULT_THROTTLE_RETRY_DELAY,
};

/// Name of the config directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".stacklayer";

pub const CONFIG_FILE_NAME: &str = "config.ini";

pub const DEFAULT_LOG_FILE_NAME: &str = "stacklayer.log";

/// `[throttle] default_limit`; unlimited.
pub const DEFAULT_THROTTLE_LIMIT: usize = 0;

/// Default log file (~/.stacklayer/stacklayer.log).
pub fn default_log_file() -> PathBuf {
    super::file::config_directory().join(DEFAULT_LOG_FILE_NAME)
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            throttle: ThrottleSettings::default(),
            poll: PollSettings::default(),
            timings: TimingSettings::default(),
            background: BackgroundSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            job_channel_capacity: DEFAULT_JOB_CHANNEL_CAPACITY,
            backend_concurrent: DEFAULT_BACKEND_CAPACITY,
            repository_concurrent: DEFAULT_REPOSITORY_CAPACITY,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_POLL_MAX_RETRIES,
            retry_delay_secs: DEFAULT_POLL_RETRY_DELAY.as_secs(),
            check_max_retries: DEFAULT_CHECK_MAX_RETRIES,
            check_retry_delay_secs: DEFAULT_CHECK_RETRY_DELAY.as_secs(),
            throttle_retry_delay_secs: DEFAULT_THROTTLE_RETRY_DELAY.as_secs(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            volume_poll_countdown_secs: DEFAULT_VOLUME_POLL_COUNTDOWN.as_secs(),
            snapshot_poll_countdown_secs: DEFAULT_SNAPSHOT_POLL_COUNTDOWN.as_secs(),
            instance_settle_secs: DEFAULT_INSTANCE_SETTLE.as_secs(),
            floating_ip_poll_countdown_secs: DEFAULT_FLOATING_IP_POLL_COUNTDOWN.as_secs(),
        }
    }
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: background::DEFAULT_RECONCILE_INTERVAL_SECS,
            schedule_interval_secs: background::DEFAULT_SCHEDULE_INTERVAL_SECS,
            expiry_interval_secs: background::DEFAULT_EXPIRY_INTERVAL_SECS,
            stuck_interval_secs: background::DEFAULT_STUCK_INTERVAL_SECS,
            stuck_timeout_mins: background::DEFAULT_STUCK_TIMEOUT_MINS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}
