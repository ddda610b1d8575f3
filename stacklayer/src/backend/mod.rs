//! Cloud backend contract.
//!
//! The orchestrator never talks to a provider API directly. Every remote
//! interaction goes through [`CloudBackend::invoke`] with a named
//! [`BackendMethod`], and drift detection uses [`CloudBackend::list`].
//!
//! ```text
//! BackendMethodTask ──► BackendRequest ──► CloudBackend::invoke ──► BackendReply
//!                                                                   │
//!                         apply_record(resource, record) ◄──────────┘
//! ```
//!
//! [`SimulatedBackend`] is an in-memory cloud with scripted failures, used
//! by tests and the CLI demo.

mod method;
mod record;
mod simulated;

pub use method::BackendMethod;
pub use record::{apply_record, BackendRecord, SyncField};
pub use simulated::{BackendCall, SimulatedBackend};

use crate::model::{Resource, ResourceKind, SettingsId};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Runtime-state labels reported by the backend.
pub mod runtime {
    pub const VOLUME_CREATING: &str = "creating";
    pub const VOLUME_AVAILABLE: &str = "available";
    pub const VOLUME_IN_USE: &str = "in-use";
    pub const VOLUME_ERROR: &str = "error";
    pub const SNAPSHOT_AVAILABLE: &str = "available";
    pub const SNAPSHOT_ERROR: &str = "error";
    pub const INSTANCE_ACTIVE: &str = "ACTIVE";
    pub const INSTANCE_SHUTOFF: &str = "SHUTOFF";
    pub const INSTANCE_VERIFY_RESIZE: &str = "VERIFY_RESIZE";
    pub const INSTANCE_ERRED: &str = "ERRED";
    pub const FLOATING_IP_ACTIVE: &str = "ACTIVE";
    pub const FLOATING_IP_DOWN: &str = "DOWN";
    pub const FLOATING_IP_ERRED: &str = "ERRED";
    pub const TENANT_ONLINE: &str = "online";
}

/// Errors raised by the backend client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The provider rejected the call.
    #[error("{0}")]
    Api(String),

    /// The provider could not be reached.
    #[error("Backend is unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} {backend_id} does not exist at backend")]
    NotFound {
        kind: ResourceKind,
        backend_id: String,
    },
}

/// A call to a named backend method.
#[derive(Clone, Debug)]
pub struct BackendRequest {
    pub method: BackendMethod,
    /// The resource the method runs on, as stored when the call was made.
    pub resource: Resource,
    /// Other resources the call needs (volumes of an instance, the source
    /// volume of a snapshot, floating IPs to push).
    pub related: Vec<Resource>,
    pub params: BTreeMap<String, String>,
}

impl BackendRequest {
    pub fn new(method: BackendMethod, resource: Resource) -> Self {
        Self {
            method,
            resource,
            related: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_related(mut self, related: Vec<Resource>) -> Self {
        self.related = related;
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Result of a backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendReply {
    /// Accepted, nothing to record.
    Ack,
    /// The current backend view of the target resource.
    Record(BackendRecord),
    /// Backend views of related resources, keyed by backend id.
    Records(Vec<BackendRecord>),
    /// Answer to an existence check: true once the resource is gone.
    Gone(bool),
}

/// Boxed future returned by backend calls.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Client for one cloud provider.
pub trait CloudBackend: Send + Sync + 'static {
    /// Invokes a named method.
    fn invoke(&self, request: BackendRequest) -> BackendFuture<'_, BackendReply>;

    /// Lists every backend resource of `kind` visible to `settings`.
    fn list(&self, settings: SettingsId, kind: ResourceKind) -> BackendFuture<'_, Vec<BackendRecord>>;

    /// Returns the backend name for logging.
    fn name(&self) -> &str;
}
