//! Deletion of backups and snapshots past their retention.

use crate::executor::Priority;
use crate::model::{Resource, ResourceDetails, ResourceKind, ResourceState};
use crate::orchestrator::{Operation, Orchestrator};
use crate::repository::ResourceFilter;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome counters of one cleanup sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Expiry of a resource that is cleaned up on its own.
///
/// Snapshots inside a backup go with the backup and are never expired
/// individually.
fn expiry(resource: &Resource) -> Option<DateTime<Utc>> {
    match &resource.details {
        ResourceDetails::Backup(b) => b.kept_until,
        ResourceDetails::Snapshot(s) if s.backup.is_none() => s.kept_until,
        _ => None,
    }
}

/// Submits delete chains for expired backups and snapshots.
pub struct ExpiredResourceCleaner {
    orchestrator: Arc<Orchestrator>,
}

impl ExpiredResourceCleaner {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn run_once(&self, now: DateTime<Utc>) -> ExpiryReport {
        let mut report = ExpiryReport::default();
        for kind in [ResourceKind::Backup, ResourceKind::Snapshot] {
            let expired = self
                .orchestrator
                .repository()
                .find(&ResourceFilter::kind(kind).in_states(&[ResourceState::Ok]))
                .into_iter()
                .filter(|r| expiry(r).map_or(false, |kept_until| kept_until < now));

            for resource in expired {
                match self.orchestrator.execute_with_priority(
                    resource.id(),
                    Operation::delete(),
                    Priority::BACKGROUND,
                ) {
                    Ok(_) => {
                        info!(
                            resource_id = %resource.id(),
                            kind = %kind,
                            name = %resource.name,
                            "Deleting expired resource"
                        );
                        report.deleted += 1;
                    }
                    Err(e) => {
                        warn!(resource_id = %resource.id(), error = %e, "Failed to delete expired resource");
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupDetails, SnapshotDetails};
    use crate::repository::ResourceRepository;
    use crate::orchestrator::testing::Harness;
    use chrono::Duration;

    fn snapshot(harness: &Harness, name: &str, kept_until: Option<DateTime<Utc>>) -> Resource {
        let snapshot = harness.insert(
            name,
            ResourceDetails::Snapshot(SnapshotDetails {
                size: 1024,
                kept_until,
                ..Default::default()
            }),
        );
        harness.materialize(snapshot.id(), &format!("snap-{}", snapshot.id().0))
    }

    #[test]
    fn test_only_expired_resources_are_deleted() {
        let now = Utc::now();
        let harness = Harness::new();
        let old = snapshot(&harness, "old", Some(now - Duration::hours(1)));
        let fresh = snapshot(&harness, "fresh", Some(now + Duration::hours(1)));
        let forever = snapshot(&harness, "forever", None);
        let Harness {
            repository,
            orchestrator,
            executor: _executor,
            ..
        } = harness;
        let cleaner = ExpiredResourceCleaner::new(Arc::new(orchestrator));

        let report = cleaner.run_once(now);
        assert_eq!(report, ExpiryReport { deleted: 1, failed: 0 });
        assert_eq!(
            repository.get(old.id()).unwrap().state(),
            ResourceState::DeletionScheduled
        );
        assert_eq!(repository.get(fresh.id()).unwrap().state(), ResourceState::Ok);
        assert_eq!(repository.get(forever.id()).unwrap().state(), ResourceState::Ok);
    }

    #[test]
    fn test_backup_snapshots_follow_their_backup() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        let harness = Harness::new();
        let backup = harness.insert(
            "nightly",
            ResourceDetails::Backup(BackupDetails {
                kept_until: past,
                ..Default::default()
            }),
        );
        let backup = harness.materialize(backup.id(), "backup-1");
        let member = harness.insert(
            "nightly (data)",
            ResourceDetails::Snapshot(SnapshotDetails {
                backup: Some(backup.id()),
                kept_until: past,
                ..Default::default()
            }),
        );
        let member = harness.materialize(member.id(), "snap-1");

        assert_eq!(expiry(&backup), past);
        assert_eq!(expiry(&member), None);
    }
}
