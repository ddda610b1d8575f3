//! Chain countdowns.

use std::time::Duration;

pub const DEFAULT_VOLUME_POLL_COUNTDOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_SNAPSHOT_POLL_COUNTDOWN: Duration = Duration::from_secs(10);
pub const DEFAULT_INSTANCE_SETTLE: Duration = Duration::from_secs(10);
pub const DEFAULT_FLOATING_IP_POLL_COUNTDOWN: Duration = Duration::from_secs(5);

/// Fixed delays that give the backend time to become consistent.
///
/// In a fan-out only the first branch's poll carries the countdown; the
/// others start right away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTimings {
    /// Before the first poll of a newly created volume.
    pub volume_poll_countdown: Duration,
    /// Before the first poll of a newly created snapshot.
    pub snapshot_poll_countdown: Duration,
    /// Between volume completion and the instance create call.
    pub instance_settle: Duration,
    /// Before the first floating IP poll.
    pub floating_ip_poll_countdown: Duration,
}

impl Default for ChainTimings {
    fn default() -> Self {
        Self {
            volume_poll_countdown: DEFAULT_VOLUME_POLL_COUNTDOWN,
            snapshot_poll_countdown: DEFAULT_SNAPSHOT_POLL_COUNTDOWN,
            instance_settle: DEFAULT_INSTANCE_SETTLE,
            floating_ip_poll_countdown: DEFAULT_FLOATING_IP_POLL_COUNTDOWN,
        }
    }
}

impl ChainTimings {
    /// All countdowns zero; used by tests and the demo.
    pub fn immediate() -> Self {
        Self {
            volume_poll_countdown: Duration::ZERO,
            snapshot_poll_countdown: Duration::ZERO,
            instance_settle: Duration::ZERO,
            floating_ip_poll_countdown: Duration::ZERO,
        }
    }

    /// Countdown for the `index`-th branch of a fan-out.
    pub fn first_only(countdown: Duration, index: usize) -> Duration {
        if index == 0 {
            countdown
        } else {
            Duration::ZERO
        }
    }
}

impl From<&crate::config::TimingSettings> for ChainTimings {
    fn from(settings: &crate::config::TimingSettings) -> Self {
        Self {
            volume_poll_countdown: Duration::from_secs(settings.volume_poll_countdown_secs),
            snapshot_poll_countdown: Duration::from_secs(settings.snapshot_poll_countdown_secs),
            instance_settle: Duration::from_secs(settings.instance_settle_secs),
            floating_ip_poll_countdown: Duration::from_secs(
                settings.floating_ip_poll_countdown_secs,
            ),
        }
    }
}
