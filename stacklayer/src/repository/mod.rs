//! Resource repository contract.
//!
//! The orchestrator reads and mutates resources exclusively through
//! [`ResourceRepository`]. Quota counters live behind the same seam so that
//! row creation and quota usage are updated atomically.

mod memory;

pub use memory::InMemoryRepository;

use crate::model::{
    ModelError, NewResource, NewSchedule, QuotaName, QuotaUsage, Resource, ResourceId,
    ResourceKind, ResourceState, Schedule, ScheduleId, ServiceSettings, SettingsId, Transition,
};
use thiserror::Error;

/// Repository errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Resource {0} not found")]
    NotFound(ResourceId),

    #[error("Service settings {0} not found")]
    SettingsNotFound(SettingsId),

    #[error("Schedule {0} not found")]
    ScheduleNotFound(ScheduleId),

    /// Validated quota usage would exceed the limit.
    #[error("Quota {name} exceeded: usage {usage} + {requested} > limit {limit}")]
    QuotaExceeded {
        name: QuotaName,
        usage: u64,
        requested: u64,
        limit: u64,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Query over resource rows. Empty criteria match everything.
#[derive(Clone, Debug, Default)]
pub struct ResourceFilter {
    pub kind: Option<ResourceKind>,
    pub states: Vec<ResourceState>,
    pub settings: Option<SettingsId>,
    pub parent: Option<ResourceId>,
}

impl ResourceFilter {
    pub fn kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn in_states(mut self, states: &[ResourceState]) -> Self {
        self.states = states.to_vec();
        self
    }

    pub fn in_settings(mut self, settings: SettingsId) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn owned_by(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        self.kind.is_none_or(|k| resource.kind() == k)
            && (self.states.is_empty() || self.states.contains(&resource.state()))
            && self.settings.is_none_or(|s| resource.settings() == s)
            && self
                .parent
                .is_none_or(|p| resource.details.parent() == Some(p))
    }
}

/// Persistence for resources, quotas, service settings and schedules.
pub trait ResourceRepository: Send + Sync {
    /// Reads a resource by identifier.
    fn get(&self, id: ResourceId) -> Result<Resource, RepositoryError>;

    /// Creates a resource in `CreationScheduled`, incrementing quota usage
    /// with validation. A rejected insert leaves no row and no usage.
    fn insert(&self, new: NewResource) -> Result<Resource, RepositoryError>;

    /// Mutates a resource in place. The closure's error aborts the change.
    /// Quota usage follows any change in the resource's consumption.
    fn modify(
        &self,
        id: ResourceId,
        change: &mut dyn FnMut(&mut Resource) -> Result<(), ModelError>,
    ) -> Result<Resource, RepositoryError>;

    /// Like [`modify`](Self::modify), but a consumption increase past a
    /// quota limit is rejected with `QuotaExceeded`. Check and charge happen
    /// in one step; a rejection leaves the row and usage unchanged.
    fn modify_within_quota(
        &self,
        id: ResourceId,
        change: &mut dyn FnMut(&mut Resource) -> Result<(), ModelError>,
    ) -> Result<Resource, RepositoryError>;

    /// Removes a resource, releasing its quota usage exactly once.
    fn delete(&self, id: ResourceId) -> Result<Resource, RepositoryError>;

    /// Lists resources matching `filter`, ordered by identifier.
    fn find(&self, filter: &ResourceFilter) -> Vec<Resource>;

    /// Atomically adds `delta` to a quota counter. With `validate`, a result
    /// above the limit is rejected and nothing changes.
    fn add_quota_usage(
        &self,
        settings: SettingsId,
        name: QuotaName,
        delta: i64,
        validate: bool,
    ) -> Result<QuotaUsage, RepositoryError>;

    fn quota(&self, settings: SettingsId, name: QuotaName) -> Result<QuotaUsage, RepositoryError>;

    fn set_quota_limit(
        &self,
        settings: SettingsId,
        name: QuotaName,
        limit: Option<u64>,
    ) -> Result<(), RepositoryError>;

    fn insert_settings(&self, name: &str) -> ServiceSettings;

    fn settings(&self, id: SettingsId) -> Result<ServiceSettings, RepositoryError>;

    fn list_settings(&self) -> Vec<ServiceSettings>;

    fn modify_settings(
        &self,
        id: SettingsId,
        change: &mut dyn FnMut(&mut ServiceSettings),
    ) -> Result<ServiceSettings, RepositoryError>;

    fn insert_schedule(&self, new: NewSchedule) -> Schedule;

    fn schedule(&self, id: ScheduleId) -> Result<Schedule, RepositoryError>;

    fn list_schedules(&self) -> Vec<Schedule>;

    fn modify_schedule(
        &self,
        id: ScheduleId,
        change: &mut dyn FnMut(&mut Schedule),
    ) -> Result<Schedule, RepositoryError>;

    /// Applies a lifecycle transition, returning the previous state and the
    /// updated resource.
    fn transition(
        &self,
        id: ResourceId,
        transition: Transition,
    ) -> Result<(ResourceState, Resource), RepositoryError> {
        let mut previous = None;
        let resource = self.modify(id, &mut |r| {
            previous = Some(r.transition(transition)?);
            Ok(())
        })?;
        Ok((previous.unwrap_or(resource.state()), resource))
    }

    /// Volumes attached to (or scheduled for) an instance.
    fn volumes_of(&self, instance: ResourceId) -> Vec<Resource> {
        self.find(&ResourceFilter::kind(ResourceKind::Volume).owned_by(instance))
    }

    fn floating_ips_of(&self, instance: ResourceId) -> Vec<Resource> {
        self.find(&ResourceFilter::kind(ResourceKind::FloatingIp).owned_by(instance))
    }

    fn snapshots_of(&self, backup: ResourceId) -> Vec<Resource> {
        self.find(&ResourceFilter::kind(ResourceKind::Snapshot).owned_by(backup))
    }

    /// Moves a resource to `Erred` recording `message`.
    fn set_erred(&self, id: ResourceId, message: &str) -> Result<Resource, RepositoryError> {
        self.modify(id, &mut |r| {
            r.set_erred(message);
            Ok(())
        })
    }
}
