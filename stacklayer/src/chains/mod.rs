//! Chain builders.
//!
//! A chain realizes one lifecycle operation on one resource. Builders read
//! the resource graph from the repository and produce a [`ChainSpec`]: the
//! schedule transitions to apply synchronously, the detail changes that
//! come with them, the task plan, and the hooks for success and failure.
//!
//! Nothing is written while a chain is built; the orchestrator validates
//! and applies the `ChainSpec` before submitting it.
//!
//! # Families
//!
//! | Family | Pre-apply           | Success  | Failure     |
//! |--------|---------------------|----------|-------------|
//! | Create | none                | set_ok   | set_erred   |
//! | Update | schedule_updating   | set_ok   | set_erred   |
//! | Action | schedule_updating + action text | set_ok | set_erred |
//! | Delete | schedule_deleting   | delete   | set_erred   |
//!
//! Builders replace the defaults where a chain needs its own cleanup.

mod backup;
mod common;
mod instance;
mod network;
mod plan;
mod registry;
mod snapshot;
mod timings;
mod volume;

pub use instance::backup_restoration;
pub use plan::ChainPlan;
pub use registry::build_chain;
pub use timings::{
    ChainTimings, DEFAULT_FLOATING_IP_POLL_COUNTDOWN, DEFAULT_INSTANCE_SETTLE,
    DEFAULT_SNAPSHOT_POLL_COUNTDOWN, DEFAULT_VOLUME_POLL_COUNTDOWN,
};

use crate::jobs::Hook;
use crate::model::{Resource, ResourceId, ResourceState, Transition};
use crate::orchestrator::OrchestratorError;
use crate::repository::ResourceRepository;
use std::collections::BTreeMap;
use std::fmt;

/// Operation family; decides the default pre-apply and hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Family {
    Create,
    Update,
    /// Named action, recorded in the resource's `action` field.
    Action(String),
    Delete,
}

impl Family {
    /// State a resource must be in for a chain of this family to start.
    pub fn accepts(&self, state: ResourceState) -> bool {
        match self {
            Self::Create => state == ResourceState::CreationScheduled,
            Self::Update | Self::Action(_) => Transition::ScheduleUpdating.apply(state).is_ok(),
            Self::Delete => Transition::ScheduleDeleting.apply(state).is_ok(),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Action(action) => write!(f, "action \"{}\"", action),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A transition applied synchronously, before the chain is submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreApply {
    pub resource: ResourceId,
    pub transition: Transition,
    pub action: Option<String>,
    pub action_details: BTreeMap<String, String>,
}

impl PreApply {
    pub fn new(resource: ResourceId, transition: Transition) -> Self {
        Self {
            resource,
            transition,
            action: None,
            action_details: BTreeMap::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.action_details.insert(key.to_string(), value.to_string());
        self
    }
}

/// A change to a resource's details that goes with the operation.
///
/// Applied after the pre-apply transitions; quota follows the change, so
/// the orchestrator checks headroom first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetailChange {
    VolumeSize(u64),
    Flavor {
        flavor_name: String,
        backend_flavor_id: String,
        cores: u64,
        ram: u64,
        disk: u64,
    },
    SecurityGroups(Vec<ResourceId>),
    /// Links and books a floating IP for an instance.
    LinkFloatingIp(ResourceId),
    UnlinkFloatingIp,
}

impl DetailChange {
    pub fn apply(&self, resource: &mut Resource) {
        match self {
            Self::VolumeSize(size) => {
                if let Some(volume) = resource.as_volume_mut() {
                    volume.size = *size;
                }
            }
            Self::Flavor {
                flavor_name,
                backend_flavor_id,
                cores,
                ram,
                disk,
            } => {
                if let Some(instance) = resource.as_instance_mut() {
                    instance.flavor_name = flavor_name.clone();
                    instance.backend_flavor_id = backend_flavor_id.clone();
                    instance.cores = *cores;
                    instance.ram = *ram;
                    instance.disk = *disk;
                }
            }
            Self::SecurityGroups(groups) => {
                if let Some(instance) = resource.as_instance_mut() {
                    instance.security_groups = groups.clone();
                }
            }
            Self::LinkFloatingIp(instance) => {
                if let Some(floating_ip) = resource.as_floating_ip_mut() {
                    floating_ip.instance = Some(*instance);
                    floating_ip.is_booked = true;
                }
            }
            Self::UnlinkFloatingIp => {
                if let Some(floating_ip) = resource.as_floating_ip_mut() {
                    floating_ip.instance = None;
                    floating_ip.is_booked = false;
                }
            }
        }
    }
}

/// A fully built chain, ready to be validated and submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSpec {
    /// Job name, e.g. `volume-extend-7`.
    pub name: String,
    pub resource: ResourceId,
    pub family: Family,
    pub pre_apply: Vec<PreApply>,
    pub changes: Vec<(ResourceId, DetailChange)>,
    pub plan: ChainPlan,
    pub on_success: Hook,
    pub on_failure: Hook,
}

impl ChainSpec {
    /// A chain with the family's default pre-apply and hooks.
    pub fn new(resource: &Resource, operation: &str, family: Family, plan: ChainPlan) -> Self {
        let id = resource.id();
        let pre_apply = match &family {
            Family::Create => Vec::new(),
            Family::Update => vec![PreApply::new(id, Transition::ScheduleUpdating)],
            Family::Action(action) => {
                vec![PreApply::new(id, Transition::ScheduleUpdating).with_action(action.clone())]
            }
            Family::Delete => vec![PreApply::new(id, Transition::ScheduleDeleting)],
        };
        let on_success = match family {
            Family::Delete => Hook::Delete(id),
            _ => Hook::SetOk(id),
        };

        Self {
            name: format!("{}-{}-{}", resource.kind(), operation, id),
            resource: id,
            family,
            pre_apply,
            changes: Vec::new(),
            plan,
            on_success,
            on_failure: Hook::SetErred(id),
        }
    }

    pub fn with_pre_apply(mut self, pre_apply: PreApply) -> Self {
        self.pre_apply.push(pre_apply);
        self
    }

    pub fn with_change(mut self, resource: ResourceId, change: DetailChange) -> Self {
        self.changes.push((resource, change));
        self
    }

    pub fn on_success(mut self, hook: Hook) -> Self {
        self.on_success = hook;
        self
    }

    pub fn on_failure(mut self, hook: Hook) -> Self {
        self.on_failure = hook;
        self
    }
}

/// What builders may read while planning.
pub struct ChainContext<'a> {
    pub repository: &'a dyn ResourceRepository,
    pub timings: ChainTimings,
}

impl<'a> ChainContext<'a> {
    pub fn new(repository: &'a dyn ResourceRepository, timings: ChainTimings) -> Self {
        Self {
            repository,
            timings,
        }
    }

    pub(crate) fn get(&self, id: ResourceId) -> Result<Resource, OrchestratorError> {
        Ok(self.repository.get(id)?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Resource graphs for the builder tests.

    use crate::model::{
        FloatingIpDetails, InstanceDetails, NewResource, Resource, ResourceDetails, ResourceId,
        SettingsId, Transition, VolumeDetails,
    };
    use crate::repository::{InMemoryRepository, ResourceRepository};

    pub struct Graph {
        pub repository: InMemoryRepository,
        pub settings: SettingsId,
    }

    impl Graph {
        pub fn new() -> Self {
            let repository = InMemoryRepository::new();
            let settings = repository.insert_settings("cloud").id;
            Self {
                repository,
                settings,
            }
        }

        pub fn insert(&self, name: &str, details: ResourceDetails) -> Resource {
            self.repository
                .insert(NewResource::new(name, self.settings, details))
                .unwrap()
        }

        /// Moves a row to OK with a backend id.
        pub fn materialize(&self, id: ResourceId, backend_id: &str) -> Resource {
            self.repository
                .modify(id, &mut |r| r.assign_backend_id(backend_id))
                .unwrap();
            self.repository.transition(id, Transition::BeginCreating).unwrap();
            self.repository.transition(id, Transition::SetOk).unwrap().1
        }

        pub fn instance(&self, name: &str) -> Resource {
            self.insert(
                name,
                ResourceDetails::Instance(InstanceDetails {
                    cores: 2,
                    ram: 2048,
                    ..Default::default()
                }),
            )
        }

        pub fn volume(&self, name: &str, instance: Option<ResourceId>, bootable: bool) -> Resource {
            self.insert(
                name,
                ResourceDetails::Volume(VolumeDetails {
                    size: 10240,
                    bootable,
                    instance,
                    ..Default::default()
                }),
            )
        }

        pub fn floating_ip(&self, instance: ResourceId) -> Resource {
            self.insert(
                "fip",
                ResourceDetails::FloatingIp(FloatingIpDetails {
                    instance: Some(instance),
                    is_booked: true,
                    ..Default::default()
                }),
            )
        }
    }
}
