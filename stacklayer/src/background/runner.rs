//! Periodic driver for the background sweeps.

use super::{ExpiredResourceCleaner, Reconciler, ScheduleTrigger, StuckResourceSweeper};
use crate::orchestrator::Orchestrator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_EXPIRY_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_STUCK_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_STUCK_TIMEOUT_MINS: u64 = 30;

/// Intervals of the background sweeps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackgroundConfig {
    pub reconcile_interval: Duration,
    pub schedule_interval: Duration,
    pub expiry_interval: Duration,
    pub stuck_interval: Duration,
    /// Age after which a CREATING resource is considered stuck.
    pub stuck_timeout: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            schedule_interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
            expiry_interval: Duration::from_secs(DEFAULT_EXPIRY_INTERVAL_SECS),
            stuck_interval: Duration::from_secs(DEFAULT_STUCK_INTERVAL_SECS),
            stuck_timeout: Duration::from_secs(DEFAULT_STUCK_TIMEOUT_MINS * 60),
        }
    }
}

impl From<&crate::config::BackgroundSettings> for BackgroundConfig {
    fn from(settings: &crate::config::BackgroundSettings) -> Self {
        Self {
            reconcile_interval: Duration::from_secs(settings.reconcile_interval_secs),
            schedule_interval: Duration::from_secs(settings.schedule_interval_secs),
            expiry_interval: Duration::from_secs(settings.expiry_interval_secs),
            stuck_interval: Duration::from_secs(settings.stuck_interval_secs),
            stuck_timeout: Duration::from_secs(settings.stuck_timeout_mins * 60),
        }
    }
}

/// Skips missed ticks and the immediate first tick.
async fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    ticker
}

/// Runs reconciliation, schedules, expiry and the stuck sweep until
/// shutdown.
pub struct BackgroundRunner {
    config: BackgroundConfig,
    reconciler: Reconciler,
    schedules: ScheduleTrigger,
    expiry: ExpiredResourceCleaner,
    stuck: StuckResourceSweeper,
}

impl BackgroundRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, config: BackgroundConfig) -> Self {
        let env = orchestrator.env().clone();
        let stuck_timeout = chrono::Duration::from_std(config.stuck_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(DEFAULT_STUCK_TIMEOUT_MINS as i64));
        Self {
            reconciler: Reconciler::new(env.clone()),
            schedules: ScheduleTrigger::new(orchestrator.clone()),
            expiry: ExpiredResourceCleaner::new(orchestrator),
            stuck: StuckResourceSweeper::new(env, stuck_timeout),
            config,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            reconcile_interval_secs = self.config.reconcile_interval.as_secs(),
            schedule_interval_secs = self.config.schedule_interval.as_secs(),
            expiry_interval_secs = self.config.expiry_interval.as_secs(),
            stuck_interval_secs = self.config.stuck_interval.as_secs(),
            "Background runner starting"
        );

        let mut reconcile = ticker(self.config.reconcile_interval).await;
        let mut schedules = ticker(self.config.schedule_interval).await;
        let mut expiry = ticker(self.config.expiry_interval).await;
        let mut stuck = ticker(self.config.stuck_interval).await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Background runner shutting down");
                    break;
                }

                _ = schedules.tick() => {
                    let report = self.schedules.run_once(Utc::now());
                    debug!(?report, "Schedule sweep done");
                }

                _ = stuck.tick() => {
                    let erred = self.stuck.run_once(Utc::now());
                    debug!(erred, "Stuck sweep done");
                }

                _ = expiry.tick() => {
                    let report = self.expiry.run_once(Utc::now());
                    debug!(?report, "Expiry sweep done");
                }

                _ = reconcile.tick() => {
                    self.reconciler.run_once().await;
                }
            }
        }
    }
}
