//! Resource entity and per-type details.

use super::schedule::ScheduleId;
use super::state::{ResourceState, Transition};
use super::ModelError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Message recorded when a resource is erred without a diagnostic.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";

/// Opaque local identifier assigned by the repository.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a service settings entry (one cloud connection).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SettingsId(pub u64);

impl fmt::Display for SettingsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "settings-{}", self.0)
    }
}

/// Kind of a managed resource.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ResourceKind {
    Tenant,
    Network,
    Subnet,
    SecurityGroup,
    FloatingIp,
    Instance,
    Volume,
    Snapshot,
    Backup,
}

impl ResourceKind {
    /// All kinds, in dependency order.
    pub const ALL: [ResourceKind; 9] = [
        Self::Tenant,
        Self::Network,
        Self::Subnet,
        Self::SecurityGroup,
        Self::FloatingIp,
        Self::Instance,
        Self::Volume,
        Self::Snapshot,
        Self::Backup,
    ];

    /// Returns the snake-case name, also used as config key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security_group",
            Self::FloatingIp => "floating_ip",
            Self::Instance => "instance",
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Backup => "backup",
        }
    }

    /// Parses a snake-case kind name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance (virtual machine) details.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceDetails {
    pub flavor_name: String,
    pub backend_flavor_id: String,
    pub cores: u64,
    /// RAM in MB.
    pub ram: u64,
    /// Disk in MB.
    pub disk: u64,
    pub public_key: Option<String>,
    pub security_groups: Vec<ResourceId>,
    pub internal_ips: Vec<String>,
}

/// Block storage volume details.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VolumeDetails {
    /// Size in MB.
    pub size: u64,
    pub bootable: bool,
    pub device: String,
    pub instance: Option<ResourceId>,
    pub source_snapshot: Option<ResourceId>,
    pub image: Option<String>,
}

/// Volume snapshot details.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotDetails {
    /// Size in MB.
    pub size: u64,
    pub source_volume: Option<ResourceId>,
    /// Whether the source volume was bootable.
    pub bootable: bool,
    /// Device path of the source volume at snapshot time.
    pub device: String,
    pub backup: Option<ResourceId>,
    pub kept_until: Option<DateTime<Utc>>,
    pub schedule: Option<ScheduleId>,
}

/// Floating IP details.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloatingIpDetails {
    pub address: String,
    pub instance: Option<ResourceId>,
    pub is_booked: bool,
}

/// Instance backup details. Flavor metadata is captured at backup time so a
/// restoration can recreate the instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackupDetails {
    pub instance: Option<ResourceId>,
    pub kept_until: Option<DateTime<Utc>>,
    pub schedule: Option<ScheduleId>,
    pub flavor_name: String,
    pub backend_flavor_id: String,
    pub cores: u64,
    pub ram: u64,
    pub disk: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkDetails {
    pub tenant: Option<ResourceId>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubnetDetails {
    pub network: Option<ResourceId>,
    pub cidr: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityGroupDetails {
    pub tenant: Option<ResourceId>,
    pub rules: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TenantDetails {
    /// Quota limits pushed to the backend tenant.
    pub quota_limits: BTreeMap<String, u64>,
}

/// Type-specific resource data.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceDetails {
    Tenant(TenantDetails),
    Network(NetworkDetails),
    Subnet(SubnetDetails),
    SecurityGroup(SecurityGroupDetails),
    FloatingIp(FloatingIpDetails),
    Instance(InstanceDetails),
    Volume(VolumeDetails),
    Snapshot(SnapshotDetails),
    Backup(BackupDetails),
}

impl ResourceDetails {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Tenant(_) => ResourceKind::Tenant,
            Self::Network(_) => ResourceKind::Network,
            Self::Subnet(_) => ResourceKind::Subnet,
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::FloatingIp(_) => ResourceKind::FloatingIp,
            Self::Instance(_) => ResourceKind::Instance,
            Self::Volume(_) => ResourceKind::Volume,
            Self::Snapshot(_) => ResourceKind::Snapshot,
            Self::Backup(_) => ResourceKind::Backup,
        }
    }

    /// Returns the owning resource, if the kind has one.
    ///
    /// Volumes belong to an instance, snapshots to a backup, floating IPs to
    /// an instance, networks and security groups to a tenant, subnets to a
    /// network.
    pub fn parent(&self) -> Option<ResourceId> {
        match self {
            Self::Volume(v) => v.instance,
            Self::Snapshot(s) => s.backup,
            Self::FloatingIp(f) => f.instance,
            Self::Network(n) => n.tenant,
            Self::Subnet(s) => s.network,
            Self::SecurityGroup(g) => g.tenant,
            Self::Backup(b) => b.instance,
            Self::Tenant(_) | Self::Instance(_) => None,
        }
    }
}

/// Input for creating a resource row.
#[derive(Clone, Debug)]
pub struct NewResource {
    pub name: String,
    pub description: String,
    pub settings: SettingsId,
    pub details: ResourceDetails,
}

impl NewResource {
    pub fn new(name: impl Into<String>, settings: SettingsId, details: ResourceDetails) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            settings,
            details,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A managed cloud resource.
///
/// `backend_id` and `state` are private: the identifier can only be assigned
/// once, and the state only moves through legal transitions.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    id: ResourceId,
    settings: SettingsId,
    backend_id: String,
    state: ResourceState,
    created: DateTime<Utc>,
    pub(crate) modified: DateTime<Utc>,
    pub name: String,
    pub description: String,
    pub runtime_state: String,
    pub action: String,
    pub action_details: BTreeMap<String, String>,
    pub error_message: String,
    pub details: ResourceDetails,
}

impl Resource {
    /// Creates a new row in `CreationScheduled`.
    pub(crate) fn new(id: ResourceId, new: NewResource, now: DateTime<Utc>) -> Self {
        Self {
            id,
            settings: new.settings,
            backend_id: String::new(),
            state: ResourceState::CreationScheduled,
            created: now,
            modified: now,
            name: new.name,
            description: new.description,
            runtime_state: String::new(),
            action: String::new(),
            action_details: BTreeMap::new(),
            error_message: String::new(),
            details: new.details,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.details.kind()
    }

    pub fn settings(&self) -> SettingsId {
        self.settings
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Fails with [`ModelError::StateMoved`] unless the state is one of
    /// `expected`. Used as the first step of a write planned from an older
    /// read.
    pub fn expect_state(&self, expected: &[ResourceState]) -> Result<(), ModelError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(ModelError::StateMoved(self.state))
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Returns true once the backend has materialized the resource.
    pub fn has_backend_id(&self) -> bool {
        !self.backend_id.is_empty()
    }

    /// Records the backend identifier.
    ///
    /// Assigning the same value again is a no-op; a different value is
    /// rejected.
    pub fn assign_backend_id(&mut self, backend_id: impl Into<String>) -> Result<(), ModelError> {
        let backend_id = backend_id.into();
        if self.backend_id.is_empty() {
            self.backend_id = backend_id;
            return Ok(());
        }
        if self.backend_id == backend_id {
            return Ok(());
        }
        Err(ModelError::BackendIdAlreadyAssigned {
            existing: self.backend_id.clone(),
            requested: backend_id,
        })
    }

    /// Applies a lifecycle transition and keeps the bookkeeping fields
    /// consistent with the new state. Returns the previous state.
    pub fn transition(&mut self, transition: Transition) -> Result<ResourceState, ModelError> {
        let previous = self.state;
        self.state = transition.apply(previous)?;

        match transition {
            Transition::SetOk => {
                self.action.clear();
                self.action_details.clear();
            }
            Transition::Recover => {
                self.error_message.clear();
            }
            Transition::SetErred if self.error_message.is_empty() => {
                self.error_message = DEFAULT_ERROR_MESSAGE.to_string();
            }
            _ => {}
        }
        Ok(previous)
    }

    /// Moves the resource to `Erred` recording `message`.
    pub fn set_erred(&mut self, message: &str) -> ResourceState {
        let previous = self.state;
        if !message.is_empty() {
            self.error_message = message.to_string();
        }
        // set_erred is legal from every state
        let _ = self.transition(Transition::SetErred);
        previous
    }

    /// Sets the in-flight action description.
    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
    }

    pub fn as_instance(&self) -> Option<&InstanceDetails> {
        match &self.details {
            ResourceDetails::Instance(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut InstanceDetails> {
        match &mut self.details {
            ResourceDetails::Instance(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_volume(&self) -> Option<&VolumeDetails> {
        match &self.details {
            ResourceDetails::Volume(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_volume_mut(&mut self) -> Option<&mut VolumeDetails> {
        match &mut self.details {
            ResourceDetails::Volume(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&SnapshotDetails> {
        match &self.details {
            ResourceDetails::Snapshot(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_snapshot_mut(&mut self) -> Option<&mut SnapshotDetails> {
        match &mut self.details {
            ResourceDetails::Snapshot(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_floating_ip(&self) -> Option<&FloatingIpDetails> {
        match &self.details {
            ResourceDetails::FloatingIp(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_floating_ip_mut(&mut self) -> Option<&mut FloatingIpDetails> {
        match &mut self.details {
            ResourceDetails::FloatingIp(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_backup(&self) -> Option<&BackupDetails> {
        match &self.details {
            ResourceDetails::Backup(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\" ({})", self.kind(), self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn volume() -> Resource {
        Resource::new(
            ResourceId(1),
            NewResource::new(
                "data",
                SettingsId(1),
                ResourceDetails::Volume(VolumeDetails {
                    size: 1024,
                    ..Default::default()
                }),
            ),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_resource_is_creation_scheduled() {
        let resource = volume();
        assert_eq!(resource.state(), ResourceState::CreationScheduled);
        assert!(!resource.has_backend_id());
        assert_eq!(resource.kind(), ResourceKind::Volume);
    }

    #[test]
    fn test_expect_state() {
        let resource = volume();
        assert!(resource
            .expect_state(&[ResourceState::CreationScheduled, ResourceState::Ok])
            .is_ok());
        assert_eq!(
            resource.expect_state(&[ResourceState::Creating]),
            Err(ModelError::StateMoved(ResourceState::CreationScheduled))
        );
    }

    #[test]
    fn test_backend_id_assigned_once() {
        let mut resource = volume();
        resource.assign_backend_id("vol-1").unwrap();
        resource.assign_backend_id("vol-1").unwrap();
        assert!(resource.assign_backend_id("vol-2").is_err());
        assert_eq!(resource.backend_id(), "vol-1");
    }

    #[test]
    fn test_set_ok_clears_action() {
        let mut resource = volume();
        resource.transition(Transition::BeginCreating).unwrap();
        resource.set_action("Extend");
        resource
            .action_details
            .insert("message".to_string(), "x".to_string());
        resource.transition(Transition::SetOk).unwrap();
        assert!(resource.action.is_empty());
        assert!(resource.action_details.is_empty());
    }

    #[test]
    fn test_recover_clears_error() {
        let mut resource = volume();
        resource.set_erred("boom");
        assert_eq!(resource.error_message, "boom");
        resource.transition(Transition::Recover).unwrap();
        assert_eq!(resource.state(), ResourceState::Ok);
        assert!(resource.error_message.is_empty());
    }

    #[test]
    fn test_erred_without_message_gets_default() {
        let mut resource = volume();
        resource.set_erred("");
        assert_eq!(resource.error_message, DEFAULT_ERROR_MESSAGE);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::from_name("server"), None);
    }

    fn any_transition() -> impl Strategy<Value = Transition> {
        prop_oneof![
            Just(Transition::BeginCreating),
            Just(Transition::ScheduleUpdating),
            Just(Transition::BeginUpdating),
            Just(Transition::ScheduleDeleting),
            Just(Transition::BeginDeleting),
            Just(Transition::SetOk),
            Just(Transition::SetErred),
            Just(Transition::Recover),
        ]
    }

    proptest! {
        /// Property: no sequence of transitions leaves an erred resource without
        /// a message or changes an assigned backend id.
        #[test]
        fn prop_lifecycle_invariants(
            transitions in proptest::collection::vec(any_transition(), 0..40),
            reassign in proptest::collection::vec("[a-z]{1,6}", 0..5),
        ) {
            let mut resource = volume();
            resource.assign_backend_id("backend-1").unwrap();
            for transition in transitions {
                let _ = resource.transition(transition);
                prop_assert!(
                    resource.state() != ResourceState::Erred || !resource.error_message.is_empty()
                );
            }
            for candidate in reassign {
                let _ = resource.assign_backend_id(candidate);
            }
            prop_assert_eq!(resource.backend_id(), "backend-1");
        }
    }
}
