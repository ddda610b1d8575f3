//! Backup and snapshot schedules.
//!
//! Each due schedule is advanced, then produces one resource:
//! `Backup#{n} of {instance}` or `Snapshot#{n} of {volume}`, kept for the
//! schedule's retention. `call_count` only counts produced resources. A
//! quota rejection deactivates the schedule with the reason instead of
//! retrying every period.

use crate::executor::Priority;
use crate::model::{ResourceId, Schedule, ScheduleId, ScheduleTarget};
use crate::orchestrator::{BackupRequest, Orchestrator, OrchestratorError, Provisioned};
use crate::repository::{RepositoryError, ResourceRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome counters of one trigger sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub triggered: usize,
    pub deactivated: usize,
    /// Due schedules skipped this time, e.g. because the target was busy.
    pub skipped: usize,
}

/// True for rejections that will not go away by waiting a period.
fn is_permanent(err: &OrchestratorError) -> bool {
    matches!(
        err,
        OrchestratorError::Quota { .. }
            | OrchestratorError::Repository(RepositoryError::NotFound(_))
    )
}

/// Fires due schedules.
pub struct ScheduleTrigger {
    orchestrator: Arc<Orchestrator>,
}

impl ScheduleTrigger {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn repository(&self) -> &dyn ResourceRepository {
        self.orchestrator.repository()
    }

    /// Fires every active schedule whose trigger time is before `now`.
    pub fn run_once(&self, now: DateTime<Utc>) -> TriggerReport {
        let mut report = TriggerReport::default();
        let due: Vec<Schedule> = self
            .repository()
            .list_schedules()
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect();

        for schedule in due {
            match self.fire(schedule.id, now) {
                Ok(provisioned) => {
                    info!(
                        schedule_id = %schedule.id,
                        resource_id = %provisioned.resource.id(),
                        name = %provisioned.resource.name,
                        "Schedule triggered"
                    );
                    report.triggered += 1;
                }
                Err(e) if is_permanent(&e) => {
                    self.deactivate(&schedule, &e);
                    report.deactivated += 1;
                }
                Err(e) => {
                    debug!(schedule_id = %schedule.id, error = %e, "Schedule skipped");
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// Advances the trigger time and creates the resource. The call is
    /// counted only once the resource exists.
    fn fire(&self, id: ScheduleId, now: DateTime<Utc>) -> Result<Provisioned, OrchestratorError> {
        let schedule = self
            .repository()
            .modify_schedule(id, &mut |s| s.advance(now))?;
        let number = schedule.call_count + 1;
        let kept_until = schedule.kept_until(now);

        let provisioned = match schedule.target {
            ScheduleTarget::Backup { instance } => {
                let name = self.produced_name("Backup", number, instance)?;
                let instance_name = self.repository().get(instance)?.name;
                let mut request = BackupRequest::new(name)
                    .kept_until(kept_until)
                    .from_schedule(schedule.id);
                request.description = format!("Scheduled backup of instance \"{}\"", instance_name);
                self.orchestrator
                    .create_backup_with_priority(instance, request, Priority::BACKGROUND)?
            }
            ScheduleTarget::Snapshot { volume } => {
                let name = self.produced_name("Snapshot", number, volume)?;
                self.orchestrator.provision_snapshot_with_priority(
                    volume,
                    &name,
                    Some((schedule.id, kept_until)),
                    Priority::BACKGROUND,
                )?
            }
        };

        self.repository()
            .modify_schedule(id, &mut |s| s.call_count += 1)?;
        Ok(provisioned)
    }

    fn produced_name(
        &self,
        prefix: &str,
        call_count: u64,
        source: ResourceId,
    ) -> Result<String, OrchestratorError> {
        let source = self.repository().get(source)?;
        Ok(format!("{}#{} of {}", prefix, call_count, source.name))
    }

    fn deactivate(&self, schedule: &Schedule, err: &OrchestratorError) {
        let message = format!(
            "Failed to schedule \"{}\" creation. Error: {}",
            schedule.target.produced(),
            err
        );
        warn!(
            schedule_id = %schedule.id,
            schedule = %schedule.name,
            error = %message,
            "Schedule execution failed, deactivating"
        );
        let result = self
            .repository()
            .modify_schedule(schedule.id, &mut |s| s.deactivate(message.clone()));
        if let Err(e) = result {
            warn!(schedule_id = %schedule.id, error = %e, "Failed to deactivate schedule");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewSchedule, QuotaName, ResourceDetails, ResourceKind, SnapshotDetails};
    use crate::orchestrator::testing::Harness;
    use crate::executor::JobExecutor;
    use crate::repository::{InMemoryRepository, ResourceFilter};
    use chrono::Duration;

    fn schedule(harness: &Harness, target: ScheduleTarget, now: DateTime<Utc>) -> Schedule {
        harness.repository.insert_schedule(NewSchedule {
            name: "nightly".into(),
            settings: harness.settings,
            target,
            retention_time: 2,
            period: Duration::days(1),
            next_trigger_at: now - Duration::minutes(1),
        })
    }

    /// Moves the harness orchestrator into a trigger; the executor stays
    /// alive so submissions are accepted.
    struct Fixture {
        repository: Arc<InMemoryRepository>,
        _executor: Option<JobExecutor>,
    }

    fn trigger(harness: Harness) -> (ScheduleTrigger, Fixture) {
        let Harness {
            repository,
            orchestrator,
            executor,
            ..
        } = harness;
        let fixture = Fixture {
            repository,
            _executor: executor,
        };
        (ScheduleTrigger::new(Arc::new(orchestrator)), fixture)
    }

    #[test]
    fn test_backup_schedule_creates_named_backup() {
        let now = Utc::now();
        let harness = Harness::new();
        let vm = harness.ok_instance("web");
        harness.ok_volume("web-system", 10240, Some(vm.id()));
        let s = schedule(&harness, ScheduleTarget::Backup { instance: vm.id() }, now);
        let (trigger, fixture) = trigger(harness);

        let report = trigger.run_once(now);
        assert_eq!(report.triggered, 1);

        let backups = fixture
            .repository
            .find(&ResourceFilter::kind(ResourceKind::Backup));
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, "Backup#1 of web");
        let details = backups[0].as_backup().unwrap();
        assert_eq!(details.kept_until, Some(now + Duration::days(2)));
        assert_eq!(details.schedule, Some(s.id));

        let stored = fixture.repository.schedule(s.id).unwrap();
        assert_eq!(stored.call_count, 1);
        assert!(stored.next_trigger_at > now);
    }

    #[test]
    fn test_snapshot_schedule_over_quota_deactivates() {
        let now = Utc::now();
        let harness = Harness::new();
        let volume = harness.ok_volume("db", 4096, None);
        harness
            .repository
            .set_quota_limit(harness.settings, QuotaName::Snapshots, Some(0))
            .unwrap();
        let s = schedule(&harness, ScheduleTarget::Snapshot { volume: volume.id() }, now);
        let (trigger, fixture) = trigger(harness);

        let report = trigger.run_once(now);
        assert_eq!(report.deactivated, 1);

        let stored = fixture.repository.schedule(s.id).unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.call_count, 0);
        assert!(stored
            .error_message
            .starts_with("Failed to schedule \"Snapshot\" creation. Error: Quota snapshots exceeded"));
        assert!(fixture
            .repository
            .find(&ResourceFilter::kind(ResourceKind::Snapshot))
            .is_empty());

        // Inactive schedules are not fired again.
        assert_eq!(trigger.run_once(now + Duration::days(2)), TriggerReport::default());
    }

    #[test]
    fn test_snapshot_schedule_names_and_retention() {
        let now = Utc::now();
        let harness = Harness::new();
        let volume = harness.ok_volume("db", 4096, None);
        schedule(&harness, ScheduleTarget::Snapshot { volume: volume.id() }, now);
        let (trigger, fixture) = trigger(harness);

        trigger.run_once(now);
        let snapshots = fixture
            .repository
            .find(&ResourceFilter::kind(ResourceKind::Snapshot));
        assert_eq!(snapshots[0].name, "Snapshot#1 of db");
        match &snapshots[0].details {
            ResourceDetails::Snapshot(SnapshotDetails {
                size, kept_until, ..
            }) => {
                assert_eq!(*size, 4096);
                assert_eq!(*kept_until, Some(now + Duration::days(2)));
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_busy_target_is_retried_next_period() {
        let now = Utc::now();
        let harness = Harness::new();
        let vm = harness.insert("vm", ResourceDetails::Instance(Default::default()));
        let s = schedule(&harness, ScheduleTarget::Backup { instance: vm.id() }, now);
        let (trigger, fixture) = trigger(harness);

        let report = trigger.run_once(now);
        assert_eq!(report.skipped, 1);
        assert!(fixture.repository.schedule(s.id).unwrap().is_active);
    }

    #[test]
    fn test_skipped_trigger_is_not_counted() {
        let now = Utc::now();
        let harness = Harness::new();
        let vm = harness.ok_instance("web");
        harness.ok_volume("web-system", 10240, Some(vm.id()));
        let s = schedule(&harness, ScheduleTarget::Backup { instance: vm.id() }, now);
        harness
            .orchestrator
            .execute(vm.id(), crate::orchestrator::Operation::Pull)
            .unwrap();
        let (trigger, fixture) = trigger(harness);

        let report = trigger.run_once(now);
        assert_eq!(
            report,
            TriggerReport {
                triggered: 0,
                deactivated: 0,
                skipped: 1,
            }
        );

        let stored = fixture.repository.schedule(s.id).unwrap();
        assert_eq!(stored.call_count, 0);
        assert!(stored.is_active);
        assert!(stored.next_trigger_at > now);
        assert!(fixture
            .repository
            .find(&ResourceFilter::kind(ResourceKind::Backup))
            .is_empty());

        // Once the instance is free the next period produces Backup#1.
        fixture
            .repository
            .transition(vm.id(), crate::model::Transition::BeginUpdating)
            .unwrap();
        fixture
            .repository
            .transition(vm.id(), crate::model::Transition::SetOk)
            .unwrap();
        let later = stored.next_trigger_at + Duration::minutes(1);
        assert_eq!(trigger.run_once(later).triggered, 1);

        let backups = fixture
            .repository
            .find(&ResourceFilter::kind(ResourceKind::Backup));
        assert_eq!(backups[0].name, "Backup#1 of web");
        assert_eq!(fixture.repository.schedule(s.id).unwrap().call_count, 1);
    }
}
