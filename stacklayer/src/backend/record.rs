//! Backend-side resource records and field synchronization.

use crate::model::{ModelError, Resource, ResourceDetails, ResourceKind};

/// A resource as reported by the backend.
///
/// Only `backend_id` is always present; other fields are filled in when the
/// backend call that produced the record knows them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendRecord {
    pub backend_id: String,
    pub name: Option<String>,
    pub runtime_state: Option<String>,
    pub size: Option<u64>,
    pub bootable: Option<bool>,
    pub device: Option<String>,
    pub cores: Option<u64>,
    pub ram: Option<u64>,
    pub disk: Option<u64>,
    pub address: Option<String>,
    /// Backend id of the instance the resource is attached to.
    pub instance: Option<String>,
    pub internal_ips: Option<Vec<String>>,
}

impl BackendRecord {
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            ..Default::default()
        }
    }

    pub fn with_runtime_state(mut self, runtime_state: impl Into<String>) -> Self {
        self.runtime_state = Some(runtime_state.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A resource field that can be copied from a backend record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncField {
    Name,
    RuntimeState,
    Size,
    Bootable,
    Device,
    Cores,
    Ram,
    Disk,
    Address,
    InternalIps,
}

impl SyncField {
    /// Every field, used when applying a direct method reply.
    pub const ALL: [SyncField; 10] = [
        Self::Name,
        Self::RuntimeState,
        Self::Size,
        Self::Bootable,
        Self::Device,
        Self::Cores,
        Self::Ram,
        Self::Disk,
        Self::Address,
        Self::InternalIps,
    ];

    /// Fields the periodic pull copies for a kind.
    pub fn allow_list(kind: ResourceKind) -> &'static [SyncField] {
        match kind {
            ResourceKind::Volume => &[
                Self::Name,
                Self::Size,
                Self::RuntimeState,
                Self::Bootable,
                Self::Device,
            ],
            ResourceKind::Snapshot => &[Self::Name, Self::Size, Self::RuntimeState],
            ResourceKind::Instance => &[
                Self::Name,
                Self::RuntimeState,
                Self::Cores,
                Self::Ram,
                Self::Disk,
            ],
            _ => &[Self::Name, Self::RuntimeState],
        }
    }
}

/// Copies the present fields in `fields` from `record` into `resource`.
///
/// Assigns the backend id if the resource has none yet; a different id on a
/// resource that already has one is an error. Returns true if anything
/// changed.
pub fn apply_record(
    resource: &mut Resource,
    record: &BackendRecord,
    fields: &[SyncField],
) -> Result<bool, ModelError> {
    let mut changed = false;

    if !record.backend_id.is_empty() && resource.backend_id() != record.backend_id {
        resource.assign_backend_id(record.backend_id.clone())?;
        changed = true;
    }

    for field in fields {
        changed |= apply_field(resource, record, *field);
    }
    Ok(changed)
}

fn set<T: PartialEq + Clone>(slot: &mut T, value: &Option<T>) -> bool {
    match value {
        Some(v) if slot != v => {
            *slot = v.clone();
            true
        }
        _ => false,
    }
}

fn apply_field(resource: &mut Resource, record: &BackendRecord, field: SyncField) -> bool {
    match field {
        SyncField::Name => set(&mut resource.name, &record.name),
        SyncField::RuntimeState => set(&mut resource.runtime_state, &record.runtime_state),
        _ => match (&mut resource.details, field) {
            (ResourceDetails::Volume(v), SyncField::Size) => set(&mut v.size, &record.size),
            (ResourceDetails::Volume(v), SyncField::Bootable) => {
                set(&mut v.bootable, &record.bootable)
            }
            (ResourceDetails::Volume(v), SyncField::Device) => set(&mut v.device, &record.device),
            (ResourceDetails::Snapshot(s), SyncField::Size) => set(&mut s.size, &record.size),
            (ResourceDetails::Instance(i), SyncField::Cores) => set(&mut i.cores, &record.cores),
            (ResourceDetails::Instance(i), SyncField::Ram) => set(&mut i.ram, &record.ram),
            (ResourceDetails::Instance(i), SyncField::Disk) => set(&mut i.disk, &record.disk),
            (ResourceDetails::Instance(i), SyncField::InternalIps) => {
                set(&mut i.internal_ips, &record.internal_ips)
            }
            (ResourceDetails::FloatingIp(f), SyncField::Address) => {
                set(&mut f.address, &record.address)
            }
            _ => false,
        },
    }
}
