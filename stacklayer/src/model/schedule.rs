//! Backup and snapshot schedules.

use super::resource::{ResourceId, SettingsId};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ScheduleId(pub u64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schedule-{}", self.0)
    }
}

/// What a schedule produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleTarget {
    /// Backups of an instance.
    Backup { instance: ResourceId },
    /// Snapshots of a volume.
    Snapshot { volume: ResourceId },
}

impl ScheduleTarget {
    /// Name of the produced resource type, as shown in failure messages.
    pub fn produced(&self) -> &'static str {
        match self {
            Self::Backup { .. } => "Backup",
            Self::Snapshot { .. } => "Snapshot",
        }
    }
}

/// Input for creating a schedule.
#[derive(Clone, Debug)]
pub struct NewSchedule {
    pub name: String,
    pub settings: SettingsId,
    pub target: ScheduleTarget,
    /// Retention in days; `0` keeps produced resources forever.
    pub retention_time: u32,
    pub period: Duration,
    pub next_trigger_at: DateTime<Utc>,
}

/// A periodic producer of backups or snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub settings: SettingsId,
    pub target: ScheduleTarget,
    pub retention_time: u32,
    pub period: Duration,
    pub next_trigger_at: DateTime<Utc>,
    pub call_count: u64,
    pub is_active: bool,
    pub error_message: String,
}

impl Schedule {
    pub(crate) fn new(id: ScheduleId, new: NewSchedule) -> Self {
        Self {
            id,
            name: new.name,
            settings: new.settings,
            target: new.target,
            retention_time: new.retention_time,
            period: new.period,
            next_trigger_at: new.next_trigger_at,
            call_count: 0,
            is_active: true,
            error_message: String::new(),
        }
    }

    /// Returns true if the schedule should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_trigger_at < now
    }

    /// Expiry for a resource produced at `now`, if retention is set.
    pub fn kept_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.retention_time > 0).then(|| now + Duration::days(i64::from(self.retention_time)))
    }

    /// Moves `next_trigger_at` past `now` in whole periods.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        if self.period <= Duration::zero() {
            self.next_trigger_at = now;
            return;
        }
        while self.next_trigger_at <= now {
            self.next_trigger_at += self.period;
        }
    }

    /// Deactivates the schedule recording why.
    pub fn deactivate(&mut self, message: impl Into<String>) {
        self.is_active = false;
        self.error_message = message.into();
    }
}
