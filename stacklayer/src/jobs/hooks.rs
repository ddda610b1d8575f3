//! Success and failure hooks.
//!
//! A chain job runs exactly one hook when it completes: its success hook if
//! every task succeeded, its failure hook otherwise. Failure hooks apply the
//! cleanup rule for partial progress: rows that were only scheduled are
//! deleted, rows that were half-way are erred, completed rows are left
//! alone.

use crate::model::{ResourceId, ResourceState, Transition, DEFAULT_ERROR_MESSAGE};
use crate::repository::RepositoryError;
use crate::tasks::TaskEnv;
use tracing::{debug, info, warn};

/// A continuation run after the whole chain's outcome is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Hook {
    Nothing,
    /// Moves a resource out of its in-progress state to OK.
    SetOk(ResourceId),
    SetErred(ResourceId),
    /// Deletes the row.
    Delete(ResourceId),
    /// Deletes the instance, unlinking the children that outlive it.
    DeleteInstance(ResourceId),
    /// Instance OK, its floating IPs unbooked.
    SetInstanceOk(ResourceId),
    /// Instance erred with volume and floating IP cleanup.
    SetInstanceErred(ResourceId),
    /// Backup erred with snapshot cleanup and schedule deactivation.
    SetBackupErred(ResourceId),
    /// Deletes every snapshot row of the backup, then the backup.
    ForceDeleteBackup(ResourceId),
    /// Restoration target instance erred with volume cleanup.
    SetBackupRestorationErred(ResourceId),
    /// Volume erred, and the instance it was attached to.
    VolumeExtendErred {
        volume: ResourceId,
        instance: Option<ResourceId>,
    },
    TenantCreateSuccess {
        tenant: ResourceId,
        network: ResourceId,
        subnet: ResourceId,
    },
    /// Tenant erred; network and subnet deleted if never started, erred otherwise.
    TenantCreateErred {
        tenant: ResourceId,
        network: ResourceId,
        subnet: ResourceId,
    },
    All(Vec<Hook>),
}

impl Hook {
    /// Runs the hook. `failure` carries the chain's failure message.
    ///
    /// Problems are logged; a hook never fails the job a second time.
    pub fn run(&self, env: &TaskEnv, failure: Option<&str>) {
        let message = failure
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_ERROR_MESSAGE);

        if let Err(e) = self.apply(env, message) {
            warn!(hook = ?self, error = %e, "Hook failed");
        }
    }

    fn apply(&self, env: &TaskEnv, message: &str) -> Result<(), RepositoryError> {
        match self {
            Self::Nothing => Ok(()),
            Self::SetOk(id) => set_ok(env, *id),
            Self::SetErred(id) => set_erred(env, *id, message),
            Self::Delete(id) => delete(env, *id),
            Self::DeleteInstance(id) => delete_instance(env, *id),
            Self::SetInstanceOk(id) => {
                set_ok(env, *id)?;
                unbook_floating_ips(env, *id)
            }
            Self::SetInstanceErred(id) => {
                set_erred(env, *id, message)?;
                clean_up_volumes(env, *id, message)?;
                clean_up_floating_ips(env, *id)
            }
            Self::SetBackupErred(id) => set_backup_erred(env, *id, message),
            Self::ForceDeleteBackup(id) => force_delete_backup(env, *id),
            Self::SetBackupRestorationErred(id) => {
                set_erred(env, *id, message)?;
                clean_up_volumes(env, *id, message)
            }
            Self::VolumeExtendErred { volume, instance } => {
                set_erred(env, *volume, message)?;
                match instance {
                    Some(instance) => set_erred(env, *instance, message),
                    None => Ok(()),
                }
            }
            Self::TenantCreateSuccess {
                tenant,
                network,
                subnet,
            } => {
                set_ok(env, *network)?;
                set_ok(env, *subnet)?;
                set_ok(env, *tenant)
            }
            Self::TenantCreateErred {
                tenant,
                network,
                subnet,
            } => {
                delete_or_err(env, *subnet, message)?;
                delete_or_err(env, *network, message)?;
                set_erred(env, *tenant, message)
            }
            Self::All(hooks) => {
                for hook in hooks {
                    hook.apply(env, message)?;
                }
                Ok(())
            }
        }
    }
}

/// Ignores rows that are already gone.
fn tolerate_missing(result: Result<(), RepositoryError>) -> Result<(), RepositoryError> {
    match result {
        Err(RepositoryError::NotFound(id)) => {
            debug!(resource_id = %id, "Hook target already deleted");
            Ok(())
        }
        other => other,
    }
}

fn set_ok(env: &TaskEnv, id: ResourceId) -> Result<(), RepositoryError> {
    let resource = match env.repository.get(id) {
        Ok(resource) => resource,
        Err(e) => return tolerate_missing(Err(e)),
    };
    if Transition::SetOk.apply(resource.state()).is_ok() {
        tolerate_missing(env.transition(id, Transition::SetOk).map(|_| ()))?;
    }
    Ok(())
}

fn set_erred(env: &TaskEnv, id: ResourceId, message: &str) -> Result<(), RepositoryError> {
    tolerate_missing(env.set_erred(id, message).map(|_| ()))
}

fn delete(env: &TaskEnv, id: ResourceId) -> Result<(), RepositoryError> {
    tolerate_missing(env.delete(id).map(|_| ()))
}

/// Deletes a row that never left `CreationScheduled`, errs it otherwise.
fn delete_or_err(env: &TaskEnv, id: ResourceId, message: &str) -> Result<(), RepositoryError> {
    let resource = match env.repository.get(id) {
        Ok(resource) => resource,
        Err(e) => return tolerate_missing(Err(e)),
    };
    if resource.state() == ResourceState::CreationScheduled {
        delete(env, id)
    } else {
        set_erred(env, id, message)
    }
}

/// Children that never reached the backend go with the instance; the rest
/// are unlinked and kept.
fn delete_instance(env: &TaskEnv, id: ResourceId) -> Result<(), RepositoryError> {
    for volume in env.repository.volumes_of(id) {
        if !volume.has_backend_id() {
            delete(env, volume.id())?;
            continue;
        }
        env.repository.modify(volume.id(), &mut |r| {
            if let Some(v) = r.as_volume_mut() {
                v.instance = None;
                v.device.clear();
            }
            Ok(())
        })?;
    }
    for floating_ip in env.repository.floating_ips_of(id) {
        if !floating_ip.has_backend_id() {
            delete(env, floating_ip.id())?;
            continue;
        }
        env.repository.modify(floating_ip.id(), &mut |r| {
            if let Some(f) = r.as_floating_ip_mut() {
                f.instance = None;
                f.is_booked = false;
            }
            Ok(())
        })?;
    }
    delete(env, id)
}

fn unbook_floating_ips(env: &TaskEnv, instance: ResourceId) -> Result<(), RepositoryError> {
    for floating_ip in env.repository.floating_ips_of(instance) {
        env.repository.modify(floating_ip.id(), &mut |r| {
            if let Some(f) = r.as_floating_ip_mut() {
                f.is_booked = false;
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Volumes of a failed instance: scheduled ones are deleted, OK ones kept,
/// the rest erred.
fn clean_up_volumes(env: &TaskEnv, instance: ResourceId, message: &str) -> Result<(), RepositoryError> {
    for volume in env.repository.volumes_of(instance) {
        match volume.state() {
            ResourceState::CreationScheduled => {
                info!(resource_id = %volume.id(), "Deleting volume that was never created");
                delete(env, volume.id())?;
            }
            ResourceState::Ok => {}
            _ => set_erred(env, volume.id(), message)?,
        }
    }
    Ok(())
}

/// Floating IPs of a failed instance: ones never created at the backend
/// are deleted, the rest unbooked.
fn clean_up_floating_ips(env: &TaskEnv, instance: ResourceId) -> Result<(), RepositoryError> {
    for floating_ip in env.repository.floating_ips_of(instance) {
        if floating_ip.has_backend_id() {
            env.repository.modify(floating_ip.id(), &mut |r| {
                if let Some(f) = r.as_floating_ip_mut() {
                    f.is_booked = false;
                }
                Ok(())
            })?;
        } else {
            delete(env, floating_ip.id())?;
        }
    }
    Ok(())
}

fn set_backup_erred(env: &TaskEnv, id: ResourceId, message: &str) -> Result<(), RepositoryError> {
    let backup = match env.repository.get(id) {
        Ok(backup) => backup,
        Err(RepositoryError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    set_erred(env, id, message)?;

    for snapshot in env.repository.snapshots_of(id) {
        if snapshot.state() == ResourceState::CreationScheduled {
            delete(env, snapshot.id())?;
        } else {
            set_erred(env, snapshot.id(), message)?;
        }
    }

    let Some(details) = backup.as_backup() else {
        return Ok(());
    };
    if let Some(schedule) = details.schedule {
        let instance = details
            .instance
            .and_then(|i| env.repository.get(i).ok())
            .map(|i| i.name)
            .unwrap_or_else(|| backup.name.clone());
        let reason = format!(
            "Failed to execute backup schedule for {}. Error: {}",
            instance, message
        );
        env.repository
            .modify_schedule(schedule, &mut |s| s.deactivate(reason.clone()))?;
        warn!(schedule_id = %schedule, reason = %reason, "Backup schedule deactivated");
    }
    Ok(())
}

fn force_delete_backup(env: &TaskEnv, id: ResourceId) -> Result<(), RepositoryError> {
    for snapshot in env.repository.snapshots_of(id) {
        delete(env, snapshot.id())?;
    }
    delete(env, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BackupDetails, FloatingIpDetails, InstanceDetails, NewResource, NewSchedule,
        ResourceDetails, ScheduleTarget, SnapshotDetails, VolumeDetails,
    };
    use crate::repository::ResourceRepository;
    use crate::tasks::testing::Fixture;

    fn instance(fixture: &Fixture) -> ResourceId {
        fixture
            .repository
            .insert(NewResource::new(
                "vm",
                fixture.settings,
                ResourceDetails::Instance(InstanceDetails::default()),
            ))
            .unwrap()
            .id()
    }

    fn volume_of(fixture: &Fixture, name: &str, instance: ResourceId) -> ResourceId {
        fixture
            .repository
            .insert(NewResource::new(
                name,
                fixture.settings,
                ResourceDetails::Volume(VolumeDetails {
                    size: 10,
                    instance: Some(instance),
                    ..Default::default()
                }),
            ))
            .unwrap()
            .id()
    }

    fn floating_ip_of(fixture: &Fixture, instance: ResourceId) -> ResourceId {
        fixture
            .repository
            .insert(NewResource::new(
                "fip",
                fixture.settings,
                ResourceDetails::FloatingIp(FloatingIpDetails {
                    instance: Some(instance),
                    is_booked: true,
                    ..Default::default()
                }),
            ))
            .unwrap()
            .id()
    }

    fn state(fixture: &Fixture, id: ResourceId) -> Option<ResourceState> {
        fixture.repository.get(id).ok().map(|r| r.state())
    }

    #[test]
    fn test_set_instance_erred_cleanup_rule() {
        let fixture = Fixture::new();
        let vm = instance(&fixture);
        let scheduled = volume_of(&fixture, "scheduled", vm);
        let creating = volume_of(&fixture, "creating", vm);
        let done = volume_of(&fixture, "done", vm);
        let fip = floating_ip_of(&fixture, vm);

        fixture.repository.transition(creating, Transition::BeginCreating).unwrap();
        fixture.repository.transition(done, Transition::BeginCreating).unwrap();
        fixture.repository.transition(done, Transition::SetOk).unwrap();

        Hook::SetInstanceErred(vm).run(&fixture.env, Some("volume stuck"));

        assert_eq!(state(&fixture, vm), Some(ResourceState::Erred));
        assert_eq!(fixture.repository.get(vm).unwrap().error_message, "volume stuck");
        assert_eq!(state(&fixture, scheduled), None);
        assert_eq!(state(&fixture, creating), Some(ResourceState::Erred));
        assert_eq!(state(&fixture, done), Some(ResourceState::Ok));
        // Never created at the backend.
        assert_eq!(state(&fixture, fip), None);
    }

    #[test]
    fn test_set_ok_skips_stable_and_missing_rows() {
        let fixture = Fixture::new();
        let vm = instance(&fixture);
        fixture.repository.transition(vm, Transition::BeginCreating).unwrap();
        let fip = floating_ip_of(&fixture, vm);

        Hook::SetInstanceOk(vm).run(&fixture.env, None);
        Hook::SetOk(vm).run(&fixture.env, None);
        Hook::SetOk(ResourceId(999)).run(&fixture.env, None);

        assert_eq!(state(&fixture, vm), Some(ResourceState::Ok));
        assert!(!fixture
            .repository
            .get(fip)
            .unwrap()
            .as_floating_ip()
            .unwrap()
            .is_booked);
    }

    #[test]
    fn test_delete_instance_unlinks_children() {
        let fixture = Fixture::new();
        let vm = instance(&fixture);
        let data = volume_of(&fixture, "data", vm);
        let scheduled = volume_of(&fixture, "scheduled", vm);
        let fip = floating_ip_of(&fixture, vm);
        for (id, backend_id) in [(data, "vol-1"), (fip, "fip-1")] {
            fixture
                .repository
                .modify(id, &mut |r| r.assign_backend_id(backend_id))
                .unwrap();
        }

        Hook::DeleteInstance(vm).run(&fixture.env, None);

        assert_eq!(state(&fixture, vm), None);
        assert_eq!(state(&fixture, scheduled), None);
        assert_eq!(fixture.repository.get(data).unwrap().as_volume().unwrap().instance, None);
        let fip = fixture.repository.get(fip).unwrap();
        assert_eq!(fip.as_floating_ip().unwrap().instance, None);
        assert!(!fip.as_floating_ip().unwrap().is_booked);
    }

    #[test]
    fn test_backup_erred_deactivates_schedule() {
        let fixture = Fixture::new();
        let vm = instance(&fixture);
        let schedule = fixture.repository.insert_schedule(NewSchedule {
            name: "nightly".into(),
            settings: fixture.settings,
            target: ScheduleTarget::Backup { instance: vm },
            retention_time: 1,
            period: chrono::Duration::days(1),
            next_trigger_at: chrono::Utc::now(),
        });
        let backup = fixture
            .repository
            .insert(NewResource::new(
                "Backup#1 of vm",
                fixture.settings,
                ResourceDetails::Backup(BackupDetails {
                    instance: Some(vm),
                    schedule: Some(schedule.id),
                    ..Default::default()
                }),
            ))
            .unwrap()
            .id();
        let snapshot = fixture
            .repository
            .insert(NewResource::new(
                "snap",
                fixture.settings,
                ResourceDetails::Snapshot(SnapshotDetails {
                    backup: Some(backup),
                    size: 5,
                    ..Default::default()
                }),
            ))
            .unwrap()
            .id();

        Hook::SetBackupErred(backup).run(&fixture.env, Some("quota"));

        assert_eq!(state(&fixture, backup), Some(ResourceState::Erred));
        assert_eq!(state(&fixture, snapshot), None);
        let schedule = fixture.repository.schedule(schedule.id).unwrap();
        assert!(!schedule.is_active);
        assert_eq!(
            schedule.error_message,
            "Failed to execute backup schedule for vm. Error: quota"
        );
    }

    #[test]
    fn test_tenant_create_erred() {
        let fixture = Fixture::new();
        let new = |name: &str, details| {
            fixture
                .repository
                .insert(NewResource::new(name, fixture.settings, details))
                .unwrap()
                .id()
        };
        let tenant = new("tenant", ResourceDetails::Tenant(Default::default()));
        let network = new("net", ResourceDetails::Network(Default::default()));
        let subnet = new("subnet", ResourceDetails::Subnet(Default::default()));
        fixture.repository.transition(tenant, Transition::BeginCreating).unwrap();
        fixture.repository.transition(network, Transition::BeginCreating).unwrap();

        Hook::TenantCreateErred {
            tenant,
            network,
            subnet,
        }
        .run(&fixture.env, Some("boom"));

        assert_eq!(state(&fixture, tenant), Some(ResourceState::Erred));
        assert_eq!(state(&fixture, network), Some(ResourceState::Erred));
        assert_eq!(state(&fixture, subnet), None);
    }
}
