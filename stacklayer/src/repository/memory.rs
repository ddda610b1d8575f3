//! In-memory repository.
//!
//! All tables sit behind one mutex so that quota validation, quota update
//! and row creation form a single critical section.

use super::{RepositoryError, ResourceFilter, ResourceRepository};
use crate::model::{
    consumption, consumption_delta, ModelError, NewResource, NewSchedule, QuotaName, QuotaUsage, Resource,
    ResourceId, Schedule, ScheduleId, ServiceSettings, SettingsId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
struct Tables {
    resources: BTreeMap<ResourceId, Resource>,
    settings: BTreeMap<SettingsId, ServiceSettings>,
    schedules: BTreeMap<ScheduleId, Schedule>,
    next_resource_id: u64,
    next_settings_id: u64,
    next_schedule_id: u64,
}

impl Tables {
    fn settings_mut(&mut self, id: SettingsId) -> Result<&mut ServiceSettings, RepositoryError> {
        self.settings
            .get_mut(&id)
            .ok_or(RepositoryError::SettingsNotFound(id))
    }

    /// Validates every delta before applying any of them.
    fn apply_quota(
        &mut self,
        settings: SettingsId,
        deltas: &[(QuotaName, i64)],
        validate: bool,
    ) -> Result<(), RepositoryError> {
        let entry = self.settings_mut(settings)?;
        if validate {
            for &(name, delta) in deltas {
                let quota = entry.quota(name);
                if quota.would_exceed(delta) {
                    return Err(RepositoryError::QuotaExceeded {
                        name,
                        usage: quota.usage,
                        requested: delta.unsigned_abs(),
                        limit: quota.limit.unwrap_or(u64::MAX),
                    });
                }
            }
        }
        for &(name, delta) in deltas {
            let quota = entry.quotas.entry(name).or_default();
            quota.usage = if delta >= 0 {
                quota.usage.saturating_add(delta as u64)
            } else {
                quota.usage.saturating_sub(delta.unsigned_abs())
            };
        }
        Ok(())
    }
}

/// Repository backed by in-process maps.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the `modified` timestamp of a resource.
    pub fn backdate(&self, id: ResourceId, modified: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock();
        let resource = tables
            .resources
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        resource.modified = modified;
        Ok(())
    }

    /// Changes a row and its quota usage together. The closure runs on a
    /// copy; the row is only replaced once the quota update went through.
    fn modify_row(
        &self,
        id: ResourceId,
        change: &mut dyn FnMut(&mut Resource) -> Result<(), ModelError>,
        validate: bool,
    ) -> Result<Resource, RepositoryError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .resources
            .get(&id)
            .ok_or(RepositoryError::NotFound(id))?;

        let mut updated = stored.clone();
        change(&mut updated)?;
        updated.modified = Utc::now();

        let deltas = consumption_delta(
            &consumption(&stored.details),
            &consumption(&updated.details),
        );
        if !deltas.is_empty() {
            tables.apply_quota(updated.settings(), &deltas, validate)?;
        }
        tables.resources.insert(id, updated.clone());
        Ok(updated)
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.tables.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceRepository for InMemoryRepository {
    fn get(&self, id: ResourceId) -> Result<Resource, RepositoryError> {
        self.tables
            .lock()
            .resources
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    fn insert(&self, new: NewResource) -> Result<Resource, RepositoryError> {
        let deltas: Vec<(QuotaName, i64)> = consumption(&new.details)
            .into_iter()
            .map(|(name, amount)| (name, amount as i64))
            .collect();

        let mut tables = self.tables.lock();
        tables.apply_quota(new.settings, &deltas, true)?;

        tables.next_resource_id += 1;
        let id = ResourceId(tables.next_resource_id);
        let resource = Resource::new(id, new, Utc::now());
        tables.resources.insert(id, resource.clone());

        debug!(resource_id = %id, kind = %resource.kind(), name = %resource.name, "Resource row created");
        Ok(resource)
    }

    fn modify(
        &self,
        id: ResourceId,
        change: &mut dyn FnMut(&mut Resource) -> Result<(), ModelError>,
    ) -> Result<Resource, RepositoryError> {
        self.modify_row(id, change, false)
    }

    fn modify_within_quota(
        &self,
        id: ResourceId,
        change: &mut dyn FnMut(&mut Resource) -> Result<(), ModelError>,
    ) -> Result<Resource, RepositoryError> {
        self.modify_row(id, change, true)
    }

    fn delete(&self, id: ResourceId) -> Result<Resource, RepositoryError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .resources
            .get(&id)
            .ok_or(RepositoryError::NotFound(id))?;

        let settings = stored.settings();
        let deltas: Vec<(QuotaName, i64)> = consumption(&stored.details)
            .into_iter()
            .map(|(name, amount)| (name, -(amount as i64)))
            .collect();
        tables.apply_quota(settings, &deltas, false)?;

        let resource = tables
            .resources
            .remove(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        debug!(resource_id = %id, kind = %resource.kind(), "Resource row deleted");
        Ok(resource)
    }

    fn find(&self, filter: &ResourceFilter) -> Vec<Resource> {
        self.tables
            .lock()
            .resources
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    fn add_quota_usage(
        &self,
        settings: SettingsId,
        name: QuotaName,
        delta: i64,
        validate: bool,
    ) -> Result<QuotaUsage, RepositoryError> {
        let mut tables = self.tables.lock();
        tables.apply_quota(settings, &[(name, delta)], validate)?;
        Ok(tables.settings_mut(settings)?.quota(name))
    }

    fn quota(&self, settings: SettingsId, name: QuotaName) -> Result<QuotaUsage, RepositoryError> {
        let tables = self.tables.lock();
        tables
            .settings
            .get(&settings)
            .map(|s| s.quota(name))
            .ok_or(RepositoryError::SettingsNotFound(settings))
    }

    fn set_quota_limit(
        &self,
        settings: SettingsId,
        name: QuotaName,
        limit: Option<u64>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock();
        tables
            .settings_mut(settings)?
            .quotas
            .entry(name)
            .or_default()
            .limit = limit;
        Ok(())
    }

    fn insert_settings(&self, name: &str) -> ServiceSettings {
        let mut tables = self.tables.lock();
        tables.next_settings_id += 1;
        let id = SettingsId(tables.next_settings_id);
        let settings = ServiceSettings::new(id, name);
        tables.settings.insert(id, settings.clone());
        settings
    }

    fn settings(&self, id: SettingsId) -> Result<ServiceSettings, RepositoryError> {
        self.tables
            .lock()
            .settings
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::SettingsNotFound(id))
    }

    fn list_settings(&self) -> Vec<ServiceSettings> {
        self.tables.lock().settings.values().cloned().collect()
    }

    fn modify_settings(
        &self,
        id: SettingsId,
        change: &mut dyn FnMut(&mut ServiceSettings),
    ) -> Result<ServiceSettings, RepositoryError> {
        let mut tables = self.tables.lock();
        let settings = tables.settings_mut(id)?;
        change(settings);
        Ok(settings.clone())
    }

    fn insert_schedule(&self, new: NewSchedule) -> Schedule {
        let mut tables = self.tables.lock();
        tables.next_schedule_id += 1;
        let id = ScheduleId(tables.next_schedule_id);
        let schedule = Schedule::new(id, new);
        tables.schedules.insert(id, schedule.clone());
        schedule
    }

    fn schedule(&self, id: ScheduleId) -> Result<Schedule, RepositoryError> {
        self.tables
            .lock()
            .schedules
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::ScheduleNotFound(id))
    }

    fn list_schedules(&self) -> Vec<Schedule> {
        self.tables.lock().schedules.values().cloned().collect()
    }

    fn modify_schedule(
        &self,
        id: ScheduleId,
        change: &mut dyn FnMut(&mut Schedule),
    ) -> Result<Schedule, RepositoryError> {
        let mut tables = self.tables.lock();
        let schedule = tables
            .schedules
            .get_mut(&id)
            .ok_or(RepositoryError::ScheduleNotFound(id))?;
        change(schedule);
        Ok(schedule.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        InstanceDetails, ResourceDetails, ResourceKind, ResourceState, Transition, VolumeDetails,
    };
    use std::sync::Arc;

    fn volume(settings: SettingsId, size: u64) -> NewResource {
        NewResource::new(
            "vol",
            settings,
            ResourceDetails::Volume(VolumeDetails {
                size,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_insert_increments_quota() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;

        repo.insert(volume(settings, 1024)).unwrap();

        assert_eq!(repo.quota(settings, QuotaName::Volumes).unwrap().usage, 1);
        assert_eq!(repo.quota(settings, QuotaName::Storage).unwrap().usage, 1024);
    }

    #[test]
    fn test_insert_rejected_over_limit_leaves_nothing() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;
        repo.set_quota_limit(settings, QuotaName::Storage, Some(1000))
            .unwrap();

        let err = repo.insert(volume(settings, 2048)).unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::QuotaExceeded {
                name: QuotaName::Storage,
                ..
            }
        ));
        assert!(repo.is_empty());
        assert_eq!(repo.quota(settings, QuotaName::Volumes).unwrap().usage, 0);
    }

    #[test]
    fn test_delete_releases_quota_once() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;
        let instance = repo
            .insert(NewResource::new(
                "vm",
                settings,
                ResourceDetails::Instance(InstanceDetails {
                    cores: 4,
                    ram: 8192,
                    ..Default::default()
                }),
            ))
            .unwrap();

        repo.delete(instance.id()).unwrap();
        assert!(repo.delete(instance.id()).is_err());

        assert_eq!(repo.quota(settings, QuotaName::Instances).unwrap().usage, 0);
        assert_eq!(repo.quota(settings, QuotaName::Vcpu).unwrap().usage, 0);
        assert_eq!(repo.quota(settings, QuotaName::Ram).unwrap().usage, 0);
    }

    #[test]
    fn test_failed_modify_leaves_row_untouched() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;
        let id = repo.insert(volume(settings, 1)).unwrap().id();

        let result = repo.modify(id, &mut |r| {
            r.name = "renamed".to_string();
            r.transition(Transition::SetOk).map(|_| ())
        });

        assert!(result.is_err());
        let stored = repo.get(id).unwrap();
        assert_eq!(stored.name, "vol");
        assert_eq!(stored.state(), ResourceState::CreationScheduled);
    }

    #[test]
    fn test_modify_keeps_quota_in_step_with_size() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;
        let id = repo.insert(volume(settings, 1024)).unwrap().id();

        repo.modify(id, &mut |r| {
            if let Some(v) = r.as_volume_mut() {
                v.size = 4096;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(repo.quota(settings, QuotaName::Storage).unwrap().usage, 4096);

        repo.delete(id).unwrap();
        assert_eq!(repo.quota(settings, QuotaName::Storage).unwrap().usage, 0);
    }

    fn grow_to(size: u64) -> impl FnMut(&mut Resource) -> Result<(), ModelError> {
        move |r| {
            r.name = "grown".to_string();
            if let Some(v) = r.as_volume_mut() {
                v.size = size;
            }
            Ok(())
        }
    }

    #[test]
    fn test_quota_rejection_leaves_row_and_usage() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;
        let id = repo.insert(volume(settings, 1024)).unwrap().id();
        repo.set_quota_limit(settings, QuotaName::Storage, Some(2048))
            .unwrap();

        let err = repo.modify_within_quota(id, &mut grow_to(4096)).unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::QuotaExceeded {
                name: QuotaName::Storage,
                usage: 1024,
                requested: 3072,
                limit: 2048,
            }
        ));
        let stored = repo.get(id).unwrap();
        assert_eq!(stored.name, "vol");
        assert_eq!(stored.as_volume().unwrap().size, 1024);
        assert_eq!(repo.quota(settings, QuotaName::Storage).unwrap().usage, 1024);

        // Shrinking is never rejected.
        repo.modify_within_quota(id, &mut grow_to(512)).unwrap();
        assert_eq!(repo.quota(settings, QuotaName::Storage).unwrap().usage, 512);
    }

    #[test]
    fn test_concurrent_growth_stays_within_limit() {
        let repo = Arc::new(InMemoryRepository::new());
        let settings = repo.insert_settings("cloud").id;
        let ids: Vec<ResourceId> = (0..8)
            .map(|_| repo.insert(volume(settings, 1024)).unwrap().id())
            .collect();
        repo.set_quota_limit(settings, QuotaName::Storage, Some(8 * 1024 + 2048))
            .unwrap();

        let threads: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let repo = repo.clone();
                std::thread::spawn(move || repo.modify_within_quota(id, &mut grow_to(2048)).is_ok())
            })
            .collect();
        let grown = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(grown, 2);
        assert_eq!(
            repo.quota(settings, QuotaName::Storage).unwrap().usage,
            8 * 1024 + 2048
        );
    }

    #[test]
    fn test_find_by_kind_state_and_parent() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;
        let vm = repo
            .insert(NewResource::new(
                "vm",
                settings,
                ResourceDetails::Instance(InstanceDetails::default()),
            ))
            .unwrap();
        let mut attached = volume(settings, 1);
        if let ResourceDetails::Volume(v) = &mut attached.details {
            v.instance = Some(vm.id());
        }
        let attached = repo.insert(attached).unwrap();
        repo.insert(volume(settings, 1)).unwrap();

        let owned = repo.find(&ResourceFilter::kind(ResourceKind::Volume).owned_by(vm.id()));
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id(), attached.id());

        repo.transition(attached.id(), Transition::BeginCreating)
            .unwrap();
        let creating = repo.find(
            &ResourceFilter::kind(ResourceKind::Volume).in_states(&[ResourceState::Creating]),
        );
        assert_eq!(creating.len(), 1);
    }

    #[test]
    fn test_concurrent_quota_updates_are_serialized() {
        let repo = Arc::new(InMemoryRepository::new());
        let settings = repo.insert_settings("cloud").id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        repo.add_quota_usage(settings, QuotaName::Storage, 1, false)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(repo.quota(settings, QuotaName::Storage).unwrap().usage, 800);
    }

    #[test]
    fn test_validated_quota_add_rejects_over_limit() {
        let repo = InMemoryRepository::new();
        let settings = repo.insert_settings("cloud").id;
        repo.set_quota_limit(settings, QuotaName::Storage, Some(10))
            .unwrap();

        repo.add_quota_usage(settings, QuotaName::Storage, 10, true)
            .unwrap();
        assert!(repo
            .add_quota_usage(settings, QuotaName::Storage, 1, true)
            .is_err());
        assert!(repo
            .add_quota_usage(settings, QuotaName::Storage, 1, false)
            .is_ok());
    }
}
