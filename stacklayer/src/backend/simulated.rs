//! In-memory simulated cloud.
//!
//! Objects are created, converge to their target runtime state after a
//! configurable number of runtime-state polls, and disappear after the same
//! number of existence checks once deleted. Failures are scripted per
//! `(method, resource name)`; convergence can be stalled or diverted to the
//! kind's error label per resource name.

use super::{
    runtime, BackendError, BackendFuture, BackendMethod, BackendRecord, BackendReply,
    BackendRequest, CloudBackend,
};
use crate::model::{Resource, ResourceKind, SettingsId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, trace};

/// Default number of polls before a pending runtime state converges.
pub const DEFAULT_CONVERGENCE_POLLS: u32 = 2;

/// A recorded backend invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCall {
    pub method: BackendMethod,
    /// Name of the resource the method ran on.
    pub resource: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Convergence {
    Stalled,
    Error,
}

#[derive(Debug)]
struct Pending {
    target: String,
    polls_left: u32,
}

#[derive(Debug)]
struct SimObject {
    kind: ResourceKind,
    settings: SettingsId,
    name: String,
    runtime_state: String,
    size: u64,
    bootable: bool,
    device: String,
    cores: u64,
    ram: u64,
    disk: u64,
    address: String,
    instance: Option<String>,
    internal_ips: Vec<String>,
    pending: Option<Pending>,
    removal: Option<u32>,
}

impl SimObject {
    fn new(resource: &Resource, runtime_state: &str) -> Self {
        Self {
            kind: resource.kind(),
            settings: resource.settings(),
            name: resource.name.clone(),
            runtime_state: runtime_state.to_string(),
            size: 0,
            bootable: false,
            device: String::new(),
            cores: 0,
            ram: 0,
            disk: 0,
            address: String::new(),
            instance: None,
            internal_ips: Vec::new(),
            pending: None,
            removal: None,
        }
    }

    fn record(&self, backend_id: &str) -> BackendRecord {
        let mut record = BackendRecord::new(backend_id).with_name(self.name.clone());
        if !self.runtime_state.is_empty() {
            record.runtime_state = Some(self.runtime_state.clone());
        }
        match self.kind {
            ResourceKind::Volume => {
                record.size = Some(self.size);
                record.bootable = Some(self.bootable);
                record.device = Some(self.device.clone());
                record.instance = self.instance.clone();
            }
            ResourceKind::Snapshot => {
                record.size = Some(self.size);
            }
            ResourceKind::Instance => {
                record.cores = Some(self.cores);
                record.ram = Some(self.ram);
                record.disk = Some(self.disk);
                record.internal_ips = Some(self.internal_ips.clone());
            }
            ResourceKind::FloatingIp => {
                record.address = Some(self.address.clone());
                record.instance = self.instance.clone();
            }
            _ => {}
        }
        record
    }

    fn start(&mut self, current: &str, target: &str, polls: u32) {
        self.runtime_state = current.to_string();
        self.pending = Some(Pending {
            target: target.to_string(),
            polls_left: polls.max(1),
        });
    }

    fn is_settled(&self) -> bool {
        self.pending.is_none() && self.removal.is_none()
    }
}

fn error_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Volume => runtime::VOLUME_ERROR,
        ResourceKind::Snapshot => runtime::SNAPSHOT_ERROR,
        ResourceKind::FloatingIp => runtime::FLOATING_IP_ERRED,
        _ => runtime::INSTANCE_ERRED,
    }
}

fn prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Tenant => "tenant",
        ResourceKind::Network => "net",
        ResourceKind::Subnet => "subnet",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::FloatingIp => "fip",
        ResourceKind::Instance => "vm",
        ResourceKind::Volume => "vol",
        ResourceKind::Snapshot => "snap",
        ResourceKind::Backup => "backup",
    }
}

#[derive(Default)]
struct SimState {
    objects: BTreeMap<String, SimObject>,
    next_id: u64,
    failures: HashMap<(BackendMethod, String), String>,
    convergence: HashMap<String, Convergence>,
    unavailable: bool,
    calls: Vec<BackendCall>,
}

impl SimState {
    fn insert(&mut self, object: SimObject) -> String {
        self.next_id += 1;
        let backend_id = format!("{}-{}", prefix(object.kind), self.next_id);
        self.objects.insert(backend_id.clone(), object);
        backend_id
    }

    fn object(&self, resource: &Resource) -> Result<&SimObject, BackendError> {
        self.objects
            .get(resource.backend_id())
            .ok_or_else(|| not_found(resource))
    }

    fn object_mut(&mut self, resource: &Resource) -> Result<&mut SimObject, BackendError> {
        self.objects
            .get_mut(resource.backend_id())
            .ok_or_else(|| not_found(resource))
    }

    fn record_of_id(&self, backend_id: &str) -> BackendRecord {
        self.objects
            .get(backend_id)
            .map(|o| o.record(backend_id))
            .unwrap_or_else(|| BackendRecord::new(backend_id))
    }

    fn record_of(&self, resource: &Resource) -> Result<BackendRecord, BackendError> {
        Ok(self.object(resource)?.record(resource.backend_id()))
    }

    /// Advances a pending runtime state by one poll.
    fn poll(&mut self, resource: &Resource) -> Result<BackendRecord, BackendError> {
        let mode = self.convergence.get(&resource.name).copied();
        let object = self.object_mut(resource)?;

        if let Some(pending) = object.pending.as_mut() {
            match mode {
                Some(Convergence::Stalled) => {}
                Some(Convergence::Error) => {
                    object.runtime_state = error_label(object.kind).to_string();
                    object.pending = None;
                }
                None => {
                    pending.polls_left = pending.polls_left.saturating_sub(1);
                    if pending.polls_left == 0 {
                        object.runtime_state = std::mem::take(&mut pending.target);
                        object.pending = None;
                    }
                }
            }
        }
        Ok(object.record(resource.backend_id()))
    }

    /// Answers an existence check for a deleted object.
    fn check_gone(&mut self, resource: &Resource) -> bool {
        if matches!(
            self.convergence.get(&resource.name),
            Some(Convergence::Stalled)
        ) {
            return false;
        }
        let backend_id = resource.backend_id();
        let Some(object) = self.objects.get_mut(backend_id) else {
            return true;
        };
        match object.removal {
            Some(left) if left > 1 => {
                object.removal = Some(left - 1);
                false
            }
            Some(_) => {
                self.objects.remove(backend_id);
                true
            }
            None => false,
        }
    }

    /// Records of `related` resources that still exist at the backend.
    fn related_records(&self, related: &[Resource]) -> Vec<BackendRecord> {
        related
            .iter()
            .filter_map(|r| {
                self.objects
                    .get(r.backend_id())
                    .map(|o| o.record(r.backend_id()))
            })
            .collect()
    }
}

fn not_found(resource: &Resource) -> BackendError {
    BackendError::NotFound {
        kind: resource.kind(),
        backend_id: resource.backend_id().to_string(),
    }
}

fn parse_param(request: &BackendRequest, key: &str) -> Result<u64, BackendError> {
    request
        .param(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| BackendError::Api(format!("Missing or invalid parameter {}", key)))
}

/// Simulated cloud backend.
pub struct SimulatedBackend {
    state: Mutex<SimState>,
    convergence_polls: u32,
    latency: Duration,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            convergence_polls: DEFAULT_CONVERGENCE_POLLS,
            latency: Duration::ZERO,
        }
    }

    /// Sets how many polls a pending runtime state needs to converge.
    pub fn with_convergence_polls(mut self, polls: u32) -> Self {
        self.convergence_polls = polls.max(1);
        self
    }

    /// Adds a delay to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes `method` fail with `message` when invoked on the resource named `name`.
    pub fn fail(&self, method: BackendMethod, name: &str, message: &str) {
        self.state
            .lock()
            .failures
            .insert((method, name.to_string()), message.to_string());
    }

    pub fn clear_failure(&self, method: BackendMethod, name: &str) {
        self.state
            .lock()
            .failures
            .remove(&(method, name.to_string()));
    }

    /// The resource named `name` never reaches its target runtime state and
    /// is never confirmed deleted.
    pub fn stall(&self, name: &str) {
        self.state
            .lock()
            .convergence
            .insert(name.to_string(), Convergence::Stalled);
    }

    /// The resource named `name` converges to its kind's error label.
    pub fn converge_to_error(&self, name: &str) {
        self.state
            .lock()
            .convergence
            .insert(name.to_string(), Convergence::Error);
    }

    /// Toggles a full outage: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Removes an object behind the orchestrator's back.
    pub fn remove(&self, backend_id: &str) -> bool {
        self.state.lock().objects.remove(backend_id).is_some()
    }

    /// Registers an existing object under `backend_id`, as if created out
    /// of band.
    pub fn adopt(&self, resource: &Resource, backend_id: &str, runtime_state: &str) {
        let mut object = SimObject::new(resource, runtime_state);
        if let Some(volume) = resource.as_volume() {
            object.size = volume.size;
            object.bootable = volume.bootable;
            object.device = volume.device.clone();
        }
        if let Some(snapshot) = resource.as_snapshot() {
            object.size = snapshot.size;
        }
        if let Some(instance) = resource.as_instance() {
            object.cores = instance.cores;
            object.ram = instance.ram;
            object.disk = instance.disk;
        }
        self.state
            .lock()
            .objects
            .insert(backend_id.to_string(), object);
    }

    /// Overrides the runtime state of an object.
    pub fn set_runtime_state(&self, backend_id: &str, runtime_state: &str) -> bool {
        match self.state.lock().objects.get_mut(backend_id) {
            Some(object) => {
                object.runtime_state = runtime_state.to_string();
                object.pending = None;
                true
            }
            None => false,
        }
    }

    /// Current backend view of an object.
    pub fn record(&self, backend_id: &str) -> Option<BackendRecord> {
        self.state
            .lock()
            .objects
            .get(backend_id)
            .map(|o| o.record(backend_id))
    }

    /// Number of live objects of `kind`.
    pub fn object_count(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .count()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, method: BackendMethod) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Returns true if `method` was invoked on the resource named `name`.
    pub fn was_called(&self, method: BackendMethod, name: &str) -> bool {
        self.state
            .lock()
            .calls
            .iter()
            .any(|c| c.method == method && c.resource == name)
    }

    fn handle(&self, request: &BackendRequest) -> Result<BackendReply, BackendError> {
        use BackendMethod as M;

        let polls = self.convergence_polls;
        let mut st = self.state.lock();
        st.calls.push(BackendCall {
            method: request.method,
            resource: request.resource.name.clone(),
        });

        if st.unavailable {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        if let Some(message) = st
            .failures
            .get(&(request.method, request.resource.name.clone()))
        {
            return Err(BackendError::Api(message.clone()));
        }

        let resource = &request.resource;
        match request.method {
            M::CreateTenant | M::CreateNetwork | M::CreateSubnet | M::CreateSecurityGroup => {
                let backend_id = st.insert(SimObject::new(resource, ""));
                Ok(BackendReply::Record(
                    BackendRecord::new(backend_id).with_name(resource.name.clone()),
                ))
            }

            M::AddAdminUserToTenant
            | M::CreateTenantUser
            | M::PushTenantQuotas
            | M::UpdateTenant
            | M::UpdateNetwork
            | M::UpdateSubnet
            | M::UpdateSecurityGroup
            | M::UpdateVolume
            | M::UpdateSnapshot
            | M::UpdateInstance
            | M::PullInstanceSecurityGroups
            | M::PushInstanceSecurityGroups
            | M::PushInstanceInternalIps => {
                let is_update = matches!(
                    request.method,
                    M::UpdateTenant
                        | M::UpdateNetwork
                        | M::UpdateSubnet
                        | M::UpdateSecurityGroup
                        | M::UpdateVolume
                        | M::UpdateSnapshot
                        | M::UpdateInstance
                );
                let object = st.object_mut(resource)?;
                if is_update {
                    object.name = resource.name.clone();
                }
                Ok(BackendReply::Ack)
            }

            M::ConnectTenantToExternalNetwork => {
                st.object(resource)?;
                if request.param("external_network_id").is_none() {
                    return Err(BackendError::Api(
                        "External network is not specified".to_string(),
                    ));
                }
                Ok(BackendReply::Ack)
            }

            M::PullTenant | M::PullVolume | M::PullSnapshot | M::PullInstance => {
                Ok(BackendReply::Record(st.record_of(resource)?))
            }

            M::PullTenantSecurityGroups | M::PullTenantFloatingIps => {
                st.object(resource)?;
                let kind = if request.method == M::PullTenantSecurityGroups {
                    ResourceKind::SecurityGroup
                } else {
                    ResourceKind::FloatingIp
                };
                let records = st
                    .objects
                    .iter()
                    .filter(|(_, o)| o.kind == kind && o.settings == resource.settings())
                    .map(|(id, o)| o.record(id))
                    .collect();
                Ok(BackendReply::Records(records))
            }

            M::CleanupTenant
            | M::DeleteNetwork
            | M::DeleteSubnet
            | M::DeleteSecurityGroup
            | M::DeleteFloatingIp => {
                st.object(resource)?;
                st.objects.remove(resource.backend_id());
                Ok(BackendReply::Ack)
            }

            M::CreateFloatingIp => {
                let mut object = SimObject::new(resource, runtime::FLOATING_IP_DOWN);
                object.address = format!("203.0.113.{}", st.next_id % 250 + 1);
                let backend_id = st.insert(object);
                Ok(BackendReply::Record(st.record_of_id(&backend_id)))
            }

            M::PullFloatingIpRuntimeState
            | M::PullVolumeRuntimeState
            | M::PullSnapshotRuntimeState
            | M::PullInstanceRuntimeState => Ok(BackendReply::Record(st.poll(resource)?)),

            M::PullFloatingIps => {
                st.object(resource)?;
                Ok(BackendReply::Records(st.related_records(&request.related)))
            }

            M::CreateVolume => {
                let details = resource.as_volume().cloned().unwrap_or_default();
                let mut object = SimObject::new(resource, runtime::VOLUME_CREATING);
                object.size = details.size;
                object.bootable = details.bootable || details.image.is_some();

                if details.source_snapshot.is_some() {
                    let snapshot = request
                        .related
                        .iter()
                        .find(|r| r.kind() == ResourceKind::Snapshot)
                        .ok_or_else(|| BackendError::Api("Source snapshot is not specified".into()))?;
                    let source = st.object(snapshot)?;
                    object.bootable = source.bootable;
                    object.size = object.size.max(source.size);
                }
                object.start(runtime::VOLUME_CREATING, runtime::VOLUME_AVAILABLE, polls);
                let backend_id = st.insert(object);
                Ok(BackendReply::Record(st.record_of_id(&backend_id)))
            }

            M::CreateSnapshot => {
                let volume = request
                    .related
                    .iter()
                    .find(|r| r.kind() == ResourceKind::Volume)
                    .ok_or_else(|| BackendError::Api("Source volume is not specified".into()))?;
                let source = st.object(volume)?;
                let mut object = SimObject::new(resource, runtime::VOLUME_CREATING);
                object.size = source.size;
                object.bootable = source.bootable;
                object.start(runtime::VOLUME_CREATING, runtime::SNAPSHOT_AVAILABLE, polls);
                let backend_id = st.insert(object);
                Ok(BackendReply::Record(st.record_of_id(&backend_id)))
            }

            M::DeleteVolume | M::DeleteSnapshot => {
                let object = st.object_mut(resource)?;
                if object.instance.is_some() {
                    return Err(BackendError::Api(format!(
                        "Volume {} is attached to an instance",
                        resource.backend_id()
                    )));
                }
                object.runtime_state = "deleting".to_string();
                object.pending = None;
                object.removal = Some(polls);
                Ok(BackendReply::Ack)
            }

            M::IsVolumeDeleted | M::IsSnapshotDeleted | M::IsInstanceDeleted => {
                Ok(BackendReply::Gone(st.check_gone(resource)))
            }

            M::ExtendVolume => {
                let new_size = parse_param(request, "new_size")?;
                let object = st.object_mut(resource)?;
                if object.instance.is_some() {
                    return Err(BackendError::Api(
                        "Volume must be detached before it can be extended".to_string(),
                    ));
                }
                object.size = new_size;
                object.start("extending", runtime::VOLUME_AVAILABLE, polls);
                Ok(BackendReply::Ack)
            }

            M::AttachVolume => {
                let instance = request
                    .related
                    .iter()
                    .find(|r| r.kind() == ResourceKind::Instance)
                    .ok_or_else(|| BackendError::Api("Instance is not specified".into()))?;
                st.object(instance)?;
                let device = request.param("device").unwrap_or("/dev/vdb").to_string();
                let object = st.object_mut(resource)?;
                if object.instance.is_some() || !object.is_settled() {
                    return Err(BackendError::Api(format!(
                        "Volume {} is not available for attachment",
                        resource.backend_id()
                    )));
                }
                object.instance = Some(instance.backend_id().to_string());
                object.device = device;
                object.start("attaching", runtime::VOLUME_IN_USE, polls);
                Ok(BackendReply::Ack)
            }

            M::DetachVolume => {
                let object = st.object_mut(resource)?;
                if object.instance.is_none() {
                    return Err(BackendError::Api(format!(
                        "Volume {} is not attached",
                        resource.backend_id()
                    )));
                }
                object.instance = None;
                object.device.clear();
                object.start("detaching", runtime::VOLUME_AVAILABLE, polls);
                Ok(BackendReply::Ack)
            }

            M::CreateInstance => {
                let details = resource.as_instance().cloned().unwrap_or_default();
                for volume in request.related.iter().filter(|r| r.kind() == ResourceKind::Volume) {
                    let object = st.object(volume)?;
                    if object.runtime_state != runtime::VOLUME_AVAILABLE {
                        return Err(BackendError::Api(format!(
                            "Volume {} is not available",
                            volume.backend_id()
                        )));
                    }
                }

                let mut object = SimObject::new(resource, runtime::INSTANCE_ACTIVE);
                object.cores = details.cores;
                object.ram = details.ram;
                object.disk = details.disk;
                object.internal_ips = vec![format!("192.168.42.{}", st.next_id % 250 + 2)];
                let backend_id = st.insert(object);

                let volumes = request
                    .related
                    .iter()
                    .filter(|r| r.kind() == ResourceKind::Volume);
                for (index, volume) in volumes.enumerate() {
                    if let Some(object) = st.objects.get_mut(volume.backend_id()) {
                        object.instance = Some(backend_id.clone());
                        object.device = format!("/dev/vd{}", (b'a' + index as u8) as char);
                        object.runtime_state = runtime::VOLUME_IN_USE.to_string();
                    }
                }
                Ok(BackendReply::Record(st.record_of_id(&backend_id)))
            }

            M::DeleteInstance => {
                st.object(resource)?;
                let backend_id = resource.backend_id().to_string();
                // Volumes still attached are deleted on termination.
                st.objects.retain(|_, o| {
                    !(o.kind == ResourceKind::Volume && o.instance.as_deref() == Some(backend_id.as_str()))
                });
                for object in st.objects.values_mut() {
                    if object.kind == ResourceKind::FloatingIp
                        && object.instance.as_deref() == Some(backend_id.as_str())
                    {
                        object.instance = None;
                        object.runtime_state = runtime::FLOATING_IP_DOWN.to_string();
                        object.pending = None;
                    }
                }
                let object = st.object_mut(resource)?;
                object.runtime_state = "DELETING".to_string();
                object.removal = Some(polls);
                Ok(BackendReply::Ack)
            }

            // Answered from the volumes alone so it also works once the
            // instance is gone.
            M::PullInstanceVolumes => {
                Ok(BackendReply::Records(st.related_records(&request.related)))
            }

            M::PullInstanceInternalIps => {
                let object = st.object(resource)?;
                let record = BackendRecord {
                    internal_ips: Some(object.internal_ips.clone()),
                    ..BackendRecord::new(resource.backend_id())
                };
                Ok(BackendReply::Record(record))
            }

            M::PushInstanceFloatingIps => {
                st.object(resource)?;
                let instance_id = resource.backend_id().to_string();
                for fip in request
                    .related
                    .iter()
                    .filter(|r| r.kind() == ResourceKind::FloatingIp)
                {
                    let object = st.object_mut(fip)?;
                    object.instance = Some(instance_id.clone());
                    object.start(runtime::FLOATING_IP_DOWN, runtime::FLOATING_IP_ACTIVE, polls);
                }
                Ok(BackendReply::Ack)
            }

            M::ResizeInstance => {
                let cores = parse_param(request, "cores")?;
                let ram = parse_param(request, "ram")?;
                let disk = parse_param(request, "disk")?;
                let object = st.object_mut(resource)?;
                object.cores = cores;
                object.ram = ram;
                object.disk = disk;
                object.start("RESIZE", runtime::INSTANCE_VERIFY_RESIZE, polls);
                Ok(BackendReply::Ack)
            }

            M::ConfirmInstanceResize => {
                let object = st.object_mut(resource)?;
                if object.runtime_state != runtime::INSTANCE_VERIFY_RESIZE {
                    return Err(BackendError::Api(format!(
                        "Cannot confirm resize of instance in state {}",
                        object.runtime_state
                    )));
                }
                object.start("RESIZE_CONFIRM", runtime::INSTANCE_SHUTOFF, polls);
                Ok(BackendReply::Ack)
            }

            M::StartInstance => {
                st.object_mut(resource)?
                    .start("STARTING", runtime::INSTANCE_ACTIVE, polls);
                Ok(BackendReply::Ack)
            }

            M::StopInstance => {
                st.object_mut(resource)?
                    .start("STOPPING", runtime::INSTANCE_SHUTOFF, polls);
                Ok(BackendReply::Ack)
            }

            M::RestartInstance => {
                st.object_mut(resource)?
                    .start("REBOOT", runtime::INSTANCE_ACTIVE, polls);
                Ok(BackendReply::Ack)
            }
        }
    }
}

impl CloudBackend for SimulatedBackend {
    fn invoke(&self, request: BackendRequest) -> BackendFuture<'_, BackendReply> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let result = self.handle(&request);
            match &result {
                Ok(_) => trace!(method = %request.method, resource = %request.resource, "Backend call succeeded"),
                Err(e) => debug!(method = %request.method, resource = %request.resource, error = %e, "Backend call failed"),
            }
            result
        })
    }

    fn list(&self, settings: SettingsId, kind: ResourceKind) -> BackendFuture<'_, Vec<BackendRecord>> {
        Box::pin(async move {
            let st = self.state.lock();
            if st.unavailable {
                return Err(BackendError::Unavailable("connection refused".to_string()));
            }
            Ok(st
                .objects
                .iter()
                .filter(|(_, o)| o.kind == kind && o.settings == settings)
                .map(|(id, o)| o.record(id))
                .collect())
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
