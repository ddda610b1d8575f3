//! Row creation for new resources.
//!
//! Each helper creates the rows a create chain needs, with quota validated
//! on every insert, then launches the chain. If any insert or the launch is
//! rejected, every row created so far is removed again, so a rejected
//! request leaves neither rows nor quota usage behind.

use super::{Operation, Orchestrator, OrchestratorError};
use crate::chains::{backup_restoration, ChainContext};
use crate::executor::{JobHandle, Priority};
use crate::model::{
    BackupDetails, FloatingIpDetails, InstanceDetails, NetworkDetails, NewResource, Resource,
    ResourceDetails, ResourceId, ResourceKind, ResourceState, ScheduleId, SecurityGroupDetails,
    SettingsId, SnapshotDetails, SubnetDetails, TenantDetails, VolumeDetails,
};
use crate::tasks::TaskEnv;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Default CIDR of a tenant's internal subnet.
pub const DEFAULT_SUBNET_CIDR: &str = "192.168.42.0/24";

/// A created resource and the chain materializing it.
#[derive(Debug)]
pub struct Provisioned {
    pub resource: Resource,
    pub handle: JobHandle,
}

/// Rows created during one request; removed again unless committed.
struct Staged<'a> {
    env: &'a TaskEnv,
    created: Vec<ResourceId>,
    committed: bool,
}

impl<'a> Staged<'a> {
    fn new(env: &'a TaskEnv) -> Self {
        Self {
            env,
            created: Vec::new(),
            committed: false,
        }
    }

    fn insert(&mut self, new: NewResource) -> Result<Resource, OrchestratorError> {
        let resource = self.env.insert(new)?;
        self.created.push(resource.id());
        Ok(resource)
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Staged<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for id in self.created.iter().rev() {
            if let Err(e) = self.env.delete(*id) {
                warn!(resource_id = %id, error = %e, "Failed to roll back staged row");
            }
        }
    }
}

/// Parameters of a new instance.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRequest {
    pub name: String,
    pub settings: SettingsId,
    pub flavor_name: String,
    pub backend_flavor_id: String,
    pub cores: u64,
    pub ram: u64,
    pub disk: u64,
    pub image: Option<String>,
    pub public_key: Option<String>,
    pub system_volume_size: u64,
    pub data_volume_sizes: Vec<u64>,
    pub security_groups: Vec<ResourceId>,
    /// Existing floating IPs to attach.
    pub floating_ips: Vec<ResourceId>,
    /// Allocate a new floating IP as part of the create chain.
    pub allocate_floating_ip: bool,
}

impl InstanceRequest {
    pub fn new(name: impl Into<String>, settings: SettingsId) -> Self {
        Self {
            name: name.into(),
            settings,
            flavor_name: String::new(),
            backend_flavor_id: String::new(),
            cores: 1,
            ram: 1024,
            disk: 0,
            image: None,
            public_key: None,
            system_volume_size: 0,
            data_volume_sizes: Vec::new(),
            security_groups: Vec::new(),
            floating_ips: Vec::new(),
            allocate_floating_ip: false,
        }
    }

    pub fn with_flavor(
        mut self,
        name: impl Into<String>,
        backend_id: impl Into<String>,
        cores: u64,
        ram: u64,
        disk: u64,
    ) -> Self {
        self.flavor_name = name.into();
        self.backend_flavor_id = backend_id.into();
        self.cores = cores;
        self.ram = ram;
        self.disk = disk;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_system_volume(mut self, size: u64) -> Self {
        self.system_volume_size = size;
        self
    }

    pub fn with_data_volume(mut self, size: u64) -> Self {
        self.data_volume_sizes.push(size);
        self
    }

    pub fn with_security_group(mut self, group: ResourceId) -> Self {
        self.security_groups.push(group);
        self
    }

    pub fn with_floating_ip(mut self, floating_ip: ResourceId) -> Self {
        self.floating_ips.push(floating_ip);
        self
    }

    pub fn allocate_floating_ip(mut self) -> Self {
        self.allocate_floating_ip = true;
        self
    }
}

/// Parameters of a new tenant and its default network.
#[derive(Clone, Debug, PartialEq)]
pub struct TenantRequest {
    pub name: String,
    pub settings: SettingsId,
    pub subnet_cidr: String,
    pub quota_limits: BTreeMap<String, u64>,
    /// Security group name and rules.
    pub security_groups: Vec<(String, Vec<String>)>,
}

impl TenantRequest {
    pub fn new(name: impl Into<String>, settings: SettingsId) -> Self {
        Self {
            name: name.into(),
            settings,
            subnet_cidr: DEFAULT_SUBNET_CIDR.to_string(),
            quota_limits: BTreeMap::new(),
            security_groups: Vec::new(),
        }
    }

    pub fn with_security_group<I, S>(mut self, name: impl Into<String>, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security_groups
            .push((name.into(), rules.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_quota_limit(mut self, name: impl Into<String>, limit: u64) -> Self {
        self.quota_limits.insert(name.into(), limit);
        self
    }
}

/// Parameters of a new backup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackupRequest {
    pub name: String,
    pub description: String,
    pub kept_until: Option<DateTime<Utc>>,
    pub schedule: Option<ScheduleId>,
}

impl BackupRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn kept_until(mut self, kept_until: Option<DateTime<Utc>>) -> Self {
        self.kept_until = kept_until;
        self
    }

    pub fn from_schedule(mut self, schedule: ScheduleId) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

fn expect_kind(resource: &Resource, kind: ResourceKind) -> Result<(), OrchestratorError> {
    if resource.kind() == kind {
        return Ok(());
    }
    Err(OrchestratorError::InvalidRequest(format!(
        "Resource {} is a {}, expected a {}",
        resource.id(),
        resource.kind(),
        kind
    )))
}

fn expect_ok(resource: &Resource, operation: &'static str) -> Result<(), OrchestratorError> {
    if resource.state() == ResourceState::Ok {
        return Ok(());
    }
    Err(OrchestratorError::IllegalTransition {
        resource: resource.id(),
        operation,
        state: resource.state(),
    })
}

impl Orchestrator {
    /// Creates a row and runs its create chain.
    pub fn provision(&self, new: NewResource) -> Result<Provisioned, OrchestratorError> {
        self.provision_with_priority(new, Priority::USER)
    }

    fn provision_with_priority(
        &self,
        new: NewResource,
        priority: Priority,
    ) -> Result<Provisioned, OrchestratorError> {
        let mut staged = Staged::new(self.env());
        let resource = staged.insert(new)?;
        let handle = self.execute_with_priority(resource.id(), Operation::Create, priority)?;
        staged.commit();
        Ok(Provisioned { resource, handle })
    }

    pub fn provision_volume(
        &self,
        settings: SettingsId,
        name: &str,
        size: u64,
    ) -> Result<Provisioned, OrchestratorError> {
        self.provision(NewResource::new(
            name,
            settings,
            ResourceDetails::Volume(VolumeDetails {
                size,
                ..Default::default()
            }),
        ))
    }

    pub fn provision_floating_ip(&self, settings: SettingsId) -> Result<Provisioned, OrchestratorError> {
        self.provision(NewResource::new(
            "floating-ip",
            settings,
            ResourceDetails::FloatingIp(FloatingIpDetails::default()),
        ))
    }

    pub fn provision_security_group<I, S>(
        &self,
        tenant: ResourceId,
        name: &str,
        rules: I,
    ) -> Result<Provisioned, OrchestratorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tenant = self.repository().get(tenant)?;
        expect_kind(&tenant, ResourceKind::Tenant)?;
        self.provision(NewResource::new(
            name,
            tenant.settings(),
            ResourceDetails::SecurityGroup(SecurityGroupDetails {
                tenant: Some(tenant.id()),
                rules: rules.into_iter().map(Into::into).collect(),
            }),
        ))
    }

    /// Snapshots a volume outside of any backup.
    pub fn provision_snapshot(&self, volume: ResourceId, name: &str) -> Result<Provisioned, OrchestratorError> {
        self.provision_snapshot_with_priority(volume, name, None, Priority::USER)
    }

    pub(crate) fn provision_snapshot_with_priority(
        &self,
        volume: ResourceId,
        name: &str,
        schedule: Option<(ScheduleId, Option<DateTime<Utc>>)>,
        priority: Priority,
    ) -> Result<Provisioned, OrchestratorError> {
        let volume = self.repository().get(volume)?;
        expect_kind(&volume, ResourceKind::Volume)?;
        expect_ok(&volume, "snapshot")?;
        let details = volume.as_volume().cloned().unwrap_or_default();

        let (schedule, kept_until) = match schedule {
            Some((id, kept_until)) => (Some(id), kept_until),
            None => (None, None),
        };
        self.provision_with_priority(
            NewResource::new(
                name,
                volume.settings(),
                ResourceDetails::Snapshot(SnapshotDetails {
                    size: details.size,
                    source_volume: Some(volume.id()),
                    bootable: details.bootable,
                    device: details.device,
                    backup: None,
                    kept_until,
                    schedule,
                }),
            ),
            priority,
        )
    }

    /// Creates an instance with its system and data volumes and floating
    /// IPs.
    pub fn provision_instance(&self, request: InstanceRequest) -> Result<Provisioned, OrchestratorError> {
        if request.system_volume_size == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "System volume size is required".into(),
            ));
        }
        for group in &request.security_groups {
            let group = self.repository().get(*group)?;
            expect_kind(&group, ResourceKind::SecurityGroup)?;
        }
        let mut floating_ips = Vec::with_capacity(request.floating_ips.len());
        for id in &request.floating_ips {
            let floating_ip = self.repository().get(*id)?;
            expect_kind(&floating_ip, ResourceKind::FloatingIp)?;
            let booked = floating_ip
                .as_floating_ip()
                .is_some_and(|f| f.is_booked || f.instance.is_some());
            if booked {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "Floating IP {} is already in use",
                    id
                )));
            }
            expect_ok(&floating_ip, "assign")?;
            floating_ips.push(floating_ip);
        }

        let mut staged = Staged::new(self.env());
        let instance = staged.insert(NewResource::new(
            request.name.clone(),
            request.settings,
            ResourceDetails::Instance(InstanceDetails {
                flavor_name: request.flavor_name.clone(),
                backend_flavor_id: request.backend_flavor_id.clone(),
                cores: request.cores,
                ram: request.ram,
                disk: request.disk,
                public_key: request.public_key.clone(),
                security_groups: request.security_groups.clone(),
                internal_ips: Vec::new(),
            }),
        ))?;

        staged.insert(NewResource::new(
            format!("{}-system", request.name),
            request.settings,
            ResourceDetails::Volume(VolumeDetails {
                size: request.system_volume_size,
                bootable: true,
                instance: Some(instance.id()),
                image: request.image.clone(),
                ..Default::default()
            }),
        ))?;
        for (index, size) in request.data_volume_sizes.iter().enumerate() {
            let name = if index == 0 {
                format!("{}-data", request.name)
            } else {
                format!("{}-data-{}", request.name, index + 1)
            };
            staged.insert(NewResource::new(
                name,
                request.settings,
                ResourceDetails::Volume(VolumeDetails {
                    size: *size,
                    instance: Some(instance.id()),
                    ..Default::default()
                }),
            ))?;
        }
        if request.allocate_floating_ip {
            staged.insert(NewResource::new(
                format!("{}-floating-ip", request.name),
                request.settings,
                ResourceDetails::FloatingIp(FloatingIpDetails {
                    instance: Some(instance.id()),
                    is_booked: true,
                    ..Default::default()
                }),
            ))?;
        }

        // Existing floating IPs are linked last; a rejected launch unlinks them.
        let mut linked = Vec::new();
        let result = floating_ips
            .iter()
            .try_for_each(|floating_ip| {
                self.repository().modify(floating_ip.id(), &mut |r| {
                    if let Some(details) = r.as_floating_ip_mut() {
                        details.instance = Some(instance.id());
                        details.is_booked = true;
                    }
                    Ok(())
                })?;
                linked.push(floating_ip.id());
                Ok::<(), OrchestratorError>(())
            })
            .and_then(|()| self.execute(instance.id(), Operation::Create));

        match result {
            Ok(handle) => {
                staged.commit();
                info!(
                    resource_id = %instance.id(),
                    volumes = 1 + request.data_volume_sizes.len(),
                    floating_ips = linked.len() + usize::from(request.allocate_floating_ip),
                    "Instance provisioning started"
                );
                Ok(Provisioned {
                    resource: instance,
                    handle,
                })
            }
            Err(e) => {
                for id in linked {
                    let unlinked = self.repository().modify(id, &mut |r| {
                        if let Some(details) = r.as_floating_ip_mut() {
                            details.instance = None;
                            details.is_booked = false;
                        }
                        Ok(())
                    });
                    if let Err(err) = unlinked {
                        warn!(resource_id = %id, error = %err, "Failed to unlink floating IP");
                    }
                }
                Err(e)
            }
        }
    }

    /// Creates a tenant with its internal network, subnet and security
    /// groups.
    pub fn provision_tenant(&self, request: TenantRequest) -> Result<Provisioned, OrchestratorError> {
        let mut staged = Staged::new(self.env());
        let tenant = staged.insert(NewResource::new(
            request.name.clone(),
            request.settings,
            ResourceDetails::Tenant(TenantDetails {
                quota_limits: request.quota_limits.clone(),
            }),
        ))?;
        let network = staged.insert(NewResource::new(
            format!("{}-int-net", request.name),
            request.settings,
            ResourceDetails::Network(NetworkDetails {
                tenant: Some(tenant.id()),
            }),
        ))?;
        staged.insert(NewResource::new(
            format!("{}-sub-net", request.name),
            request.settings,
            ResourceDetails::Subnet(SubnetDetails {
                network: Some(network.id()),
                cidr: request.subnet_cidr.clone(),
            }),
        ))?;
        for (name, rules) in &request.security_groups {
            staged.insert(NewResource::new(
                name.clone(),
                request.settings,
                ResourceDetails::SecurityGroup(SecurityGroupDetails {
                    tenant: Some(tenant.id()),
                    rules: rules.clone(),
                }),
            ))?;
        }

        let handle = self.execute(tenant.id(), Operation::Create)?;
        staged.commit();
        Ok(Provisioned {
            resource: tenant,
            handle,
        })
    }

    /// Backs an instance up: one snapshot per volume.
    pub fn create_backup(
        &self,
        instance: ResourceId,
        request: BackupRequest,
    ) -> Result<Provisioned, OrchestratorError> {
        self.create_backup_with_priority(instance, request, Priority::USER)
    }

    pub(crate) fn create_backup_with_priority(
        &self,
        instance: ResourceId,
        request: BackupRequest,
        priority: Priority,
    ) -> Result<Provisioned, OrchestratorError> {
        let instance = self.repository().get(instance)?;
        expect_kind(&instance, ResourceKind::Instance)?;
        expect_ok(&instance, "backup")?;
        let details = instance.as_instance().cloned().unwrap_or_default();
        let volumes = self.repository().volumes_of(instance.id());
        if volumes.is_empty() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "Instance {} has no volumes",
                instance.id()
            )));
        }

        let mut staged = Staged::new(self.env());
        let backup = staged.insert(
            NewResource::new(
                request.name.clone(),
                instance.settings(),
                ResourceDetails::Backup(BackupDetails {
                    instance: Some(instance.id()),
                    kept_until: request.kept_until,
                    schedule: request.schedule,
                    flavor_name: details.flavor_name,
                    backend_flavor_id: details.backend_flavor_id,
                    cores: details.cores,
                    ram: details.ram,
                    disk: details.disk,
                }),
            )
            .with_description(request.description.clone()),
        )?;
        for volume in &volumes {
            let source = volume.as_volume().cloned().unwrap_or_default();
            staged.insert(NewResource::new(
                format!("{} ({})", request.name, volume.name),
                instance.settings(),
                ResourceDetails::Snapshot(SnapshotDetails {
                    size: source.size,
                    source_volume: Some(volume.id()),
                    bootable: source.bootable,
                    device: source.device,
                    backup: Some(backup.id()),
                    kept_until: request.kept_until,
                    schedule: None,
                }),
            ))?;
        }

        let handle = self.execute_with_priority(backup.id(), Operation::Create, priority)?;
        staged.commit();
        Ok(Provisioned {
            resource: backup,
            handle,
        })
    }

    /// Recreates the backed-up instance from the backup's snapshots.
    pub fn restore_backup(&self, backup: ResourceId, name: &str) -> Result<Provisioned, OrchestratorError> {
        let backup = self.repository().get(backup)?;
        expect_kind(&backup, ResourceKind::Backup)?;
        expect_ok(&backup, "restore")?;
        let metadata = backup.as_backup().cloned().unwrap_or_default();
        let snapshots = self.repository().snapshots_of(backup.id());
        if snapshots.is_empty() || snapshots.iter().any(|s| !s.has_backend_id()) {
            return Err(OrchestratorError::NothingToRestore(format!(
                "Backup {} has no materialized snapshots",
                backup.id()
            )));
        }

        let mut staged = Staged::new(self.env());
        let instance = staged.insert(NewResource::new(
            name,
            backup.settings(),
            ResourceDetails::Instance(InstanceDetails {
                flavor_name: metadata.flavor_name,
                backend_flavor_id: metadata.backend_flavor_id,
                cores: metadata.cores,
                ram: metadata.ram,
                disk: metadata.disk,
                ..Default::default()
            }),
        ))?;
        for snapshot in &snapshots {
            let source = snapshot.as_snapshot().cloned().unwrap_or_default();
            staged.insert(NewResource::new(
                format!("{}-{}", name, snapshot.name),
                backup.settings(),
                ResourceDetails::Volume(VolumeDetails {
                    size: source.size,
                    bootable: source.bootable,
                    device: source.device,
                    instance: Some(instance.id()),
                    source_snapshot: Some(snapshot.id()),
                    image: None,
                }),
            ))?;
        }

        let ctx = ChainContext::new(self.repository(), self.timings());
        let spec = backup_restoration(&ctx, &instance)?;
        let handle = self.launch(spec, "restore", Priority::USER)?;
        staged.commit();
        info!(
            resource_id = %instance.id(),
            backup_id = %backup.id(),
            volumes = snapshots.len(),
            "Backup restoration started"
        );
        Ok(Provisioned {
            resource: instance,
            handle,
        })
    }

    /// Creates a new volume from a snapshot.
    pub fn restore_snapshot(&self, snapshot: ResourceId, name: &str) -> Result<Provisioned, OrchestratorError> {
        let snapshot = self.repository().get(snapshot)?;
        expect_kind(&snapshot, ResourceKind::Snapshot)?;
        if !snapshot.has_backend_id() {
            return Err(OrchestratorError::NothingToRestore(format!(
                "Snapshot {} does not exist at backend",
                snapshot.id()
            )));
        }
        expect_ok(&snapshot, "restore")?;
        let source = snapshot.as_snapshot().cloned().unwrap_or_default();

        self.provision(NewResource::new(
            name,
            snapshot.settings(),
            ResourceDetails::Volume(VolumeDetails {
                size: source.size,
                bootable: source.bootable,
                source_snapshot: Some(snapshot.id()),
                ..Default::default()
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::Family;
    use crate::jobs::Hook;
    use crate::model::QuotaName;
    use crate::orchestrator::testing::Harness;
    use crate::repository::{ResourceFilter, ResourceRepository};

    fn usage(harness: &Harness, name: QuotaName) -> u64 {
        harness.repository.quota(harness.settings, name).unwrap().usage
    }

    #[test]
    fn test_provision_instance_creates_rows() {
        let harness = Harness::new();
        let provisioned = harness
            .orchestrator
            .provision_instance(
                InstanceRequest::new("vm", harness.settings)
                    .with_flavor("small", "flv-1", 2, 2048, 20480)
                    .with_system_volume(10240)
                    .with_data_volume(20480)
                    .allocate_floating_ip(),
            )
            .unwrap();

        let id = provisioned.resource.id();
        let volumes = harness.repository.volumes_of(id);
        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].as_volume().unwrap().bootable);
        assert_eq!(volumes[1].name, "vm-data");
        assert_eq!(harness.repository.floating_ips_of(id).len(), 1);

        assert_eq!(usage(&harness, QuotaName::Storage), 30720);
        assert_eq!(usage(&harness, QuotaName::Vcpu), 2);
        assert_eq!(usage(&harness, QuotaName::FloatingIpCount), 1);
    }

    #[test]
    fn test_rejected_instance_leaves_nothing_behind() {
        let harness = Harness::new();
        harness
            .repository
            .set_quota_limit(harness.settings, QuotaName::Storage, Some(15000))
            .unwrap();

        let err = harness
            .orchestrator
            .provision_instance(
                InstanceRequest::new("vm", harness.settings)
                    .with_system_volume(10240)
                    .with_data_volume(10240),
            )
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Quota { name: QuotaName::Storage, .. }));

        assert!(harness.repository.is_empty());
        for name in QuotaName::ALL {
            assert_eq!(usage(&harness, name), 0, "{} usage leaked", name);
        }
    }

    #[test]
    fn test_booked_floating_ip_is_rejected() {
        let harness = Harness::new();
        let fip = harness.insert(
            "fip",
            ResourceDetails::FloatingIp(FloatingIpDetails {
                is_booked: true,
                ..Default::default()
            }),
        );
        let err = harness
            .orchestrator
            .provision_instance(
                InstanceRequest::new("vm", harness.settings)
                    .with_system_volume(1024)
                    .with_floating_ip(fip.id()),
            )
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
        assert_eq!(harness.repository.len(), 1);
    }

    #[test]
    fn test_provision_tenant_creates_network_graph() {
        let harness = Harness::new();
        let provisioned = harness
            .orchestrator
            .provision_tenant(
                TenantRequest::new("acme", harness.settings).with_security_group("ssh", ["tcp/22"]),
            )
            .unwrap();

        let networks = harness.repository.find(
            &ResourceFilter::kind(ResourceKind::Network).owned_by(provisioned.resource.id()),
        );
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].name, "acme-int-net");
        let subnets = harness
            .repository
            .find(&ResourceFilter::kind(ResourceKind::Subnet).owned_by(networks[0].id()));
        match &subnets[0].details {
            ResourceDetails::Subnet(subnet) => assert_eq!(subnet.cidr, DEFAULT_SUBNET_CIDR),
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_create_backup_requires_ok_instance() {
        let harness = Harness::new();
        let vm = harness.insert("vm", ResourceDetails::Instance(Default::default()));
        let err = harness
            .orchestrator
            .create_backup(vm.id(), BackupRequest::new("b"))
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::IllegalTransition {
                operation: "backup",
                state: ResourceState::CreationScheduled,
                ..
            }
        ));
    }

    #[test]
    fn test_create_backup_snapshots_every_volume() {
        let harness = Harness::new();
        let vm = harness.ok_instance("vm");
        harness.ok_volume("vm-system", 10240, Some(vm.id()));
        harness.ok_volume("vm-data", 2048, Some(vm.id()));

        let backup = harness
            .orchestrator
            .create_backup(vm.id(), BackupRequest::new("Backup#1 of vm"))
            .unwrap()
            .resource;

        let snapshots = harness.repository.snapshots_of(backup.id());
        assert_eq!(snapshots.len(), 2);
        assert_eq!(usage(&harness, QuotaName::Snapshots), 2);
        assert_eq!(backup.as_backup().unwrap().cores, 1);
    }

    #[test]
    fn test_restore_backup_without_snapshots() {
        let harness = Harness::new();
        let backup = harness.insert("b", ResourceDetails::Backup(Default::default()));
        let backup = harness.materialize(backup.id(), "");
        let err = harness
            .orchestrator
            .restore_backup(backup.id(), "restored")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NothingToRestore(_)));
    }

    #[test]
    fn test_restore_backup_links_volumes_to_snapshots() {
        let harness = Harness::new();
        let backup = harness.insert(
            "b",
            ResourceDetails::Backup(BackupDetails {
                cores: 4,
                ram: 4096,
                ..Default::default()
            }),
        );
        let snapshot = harness.insert(
            "snap",
            ResourceDetails::Snapshot(SnapshotDetails {
                size: 10240,
                bootable: true,
                device: "/dev/vda".into(),
                backup: Some(backup.id()),
                ..Default::default()
            }),
        );
        harness.materialize(snapshot.id(), "snap-1");
        let backup = harness.materialize(backup.id(), "");

        let restored = harness
            .orchestrator
            .restore_backup(backup.id(), "restored")
            .unwrap();
        let instance = restored.resource;
        assert_eq!(instance.as_instance().unwrap().cores, 4);

        let volumes = harness.repository.volumes_of(instance.id());
        assert_eq!(volumes.len(), 1);
        let volume = volumes[0].as_volume().unwrap();
        assert_eq!(volume.source_snapshot, Some(snapshot.id()));
        assert!(volume.bootable);
        assert!(restored.handle.id().as_str().starts_with("instance-restore-"));
    }

    #[test]
    fn test_restore_snapshot_needs_backend_snapshot() {
        let harness = Harness::new();
        let snapshot = harness.insert(
            "snap",
            ResourceDetails::Snapshot(SnapshotDetails {
                size: 1024,
                ..Default::default()
            }),
        );
        assert!(matches!(
            harness.orchestrator.restore_snapshot(snapshot.id(), "restored"),
            Err(OrchestratorError::NothingToRestore(_))
        ));

        harness.materialize(snapshot.id(), "snap-1");
        let volume = harness
            .orchestrator
            .restore_snapshot(snapshot.id(), "restored")
            .unwrap()
            .resource;
        assert_eq!(volume.as_volume().unwrap().source_snapshot, Some(snapshot.id()));

        let spec = harness
            .orchestrator
            .plan(volume.id(), &Operation::Create)
            .unwrap();
        assert_eq!(spec.family, Family::Create);
        assert_eq!(spec.on_failure, Hook::SetErred(volume.id()));
    }
}
