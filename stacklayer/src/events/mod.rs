//! Resource lifecycle events.
//!
//! Tasks and hooks emit a [`ResourceEvent`] after the repository write it
//! describes has committed. Observers (the action log, tests) consume them
//! through an [`EventSink`]; nothing reacts to repository writes implicitly.

use crate::model::{Resource, ResourceId, ResourceKind, ResourceState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// What happened to a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceEventKind {
    /// A row was created (API layer, schedule or drift import).
    Created,
    StateChanged {
        from: ResourceState,
        to: ResourceState,
    },
    Erred {
        message: String,
    },
    /// An erred resource was found healthy again.
    Recovered,
    /// Backend values were copied into the row.
    Synced,
    Deleted,
}

impl ResourceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StateChanged { .. } => "state_changed",
            Self::Erred { .. } => "erred",
            Self::Recovered => "recovered",
            Self::Synced => "synced",
            Self::Deleted => "deleted",
        }
    }
}

/// A committed change to one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceEvent {
    pub resource: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub event: ResourceEventKind,
    pub at: DateTime<Utc>,
}

impl ResourceEvent {
    pub fn new(resource: &Resource, event: ResourceEventKind) -> Self {
        Self {
            resource: resource.id(),
            kind: resource.kind(),
            name: resource.name.clone(),
            event,
            at: Utc::now(),
        }
    }

    pub fn created(resource: &Resource) -> Self {
        Self::new(resource, ResourceEventKind::Created)
    }

    pub fn state_changed(resource: &Resource, from: ResourceState) -> Self {
        Self::new(
            resource,
            ResourceEventKind::StateChanged {
                from,
                to: resource.state(),
            },
        )
    }

    pub fn erred(resource: &Resource) -> Self {
        Self::new(
            resource,
            ResourceEventKind::Erred {
                message: resource.error_message.clone(),
            },
        )
    }

    pub fn recovered(resource: &Resource) -> Self {
        Self::new(resource, ResourceEventKind::Recovered)
    }

    pub fn synced(resource: &Resource) -> Self {
        Self::new(resource, ResourceEventKind::Synced)
    }

    pub fn deleted(resource: &Resource) -> Self {
        Self::new(resource, ResourceEventKind::Deleted)
    }
}

impl fmt::Display for ResourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.event {
            ResourceEventKind::Created => {
                write!(f, "{} {} has been scheduled for creation", self.kind, self.name)
            }
            ResourceEventKind::StateChanged { from, to } => {
                write!(f, "{} {} moved from {} to {}", self.kind, self.name, from, to)
            }
            ResourceEventKind::Erred { message } => {
                write!(f, "{} {} has failed: {}", self.kind, self.name, message)
            }
            ResourceEventKind::Recovered => {
                write!(f, "{} {} has been recovered", self.kind, self.name)
            }
            ResourceEventKind::Synced => {
                write!(f, "{} {} has been synchronized with backend", self.kind, self.name)
            }
            ResourceEventKind::Deleted => {
                write!(f, "{} {} has been deleted", self.kind, self.name)
            }
        }
    }
}

/// Receiver of resource events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ResourceEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: ResourceEvent) {}
}

/// Writes events to the action log through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ResourceEvent) {
        match &event.event {
            ResourceEventKind::Erred { .. } => tracing::warn!(
                resource_id = %event.resource,
                kind = %event.kind,
                event = event.event.as_str(),
                "{}",
                event
            ),
            ResourceEventKind::StateChanged { .. } | ResourceEventKind::Synced => {
                tracing::debug!(
                    resource_id = %event.resource,
                    kind = %event.kind,
                    event = event.event.as_str(),
                    "{}",
                    event
                )
            }
            _ => tracing::info!(
                resource_id = %event.resource,
                kind = %event.kind,
                event = event.event.as_str(),
                "{}",
                event
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ResourceEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResourceEvent> {
        self.events.lock().clone()
    }

    /// Events recorded for one resource, oldest first.
    pub fn events_for(&self, resource: ResourceId) -> Vec<ResourceEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.resource == resource)
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ResourceEvent) {
        self.events.lock().push(event);
    }
}

/// Fans events out to several sinks.
pub struct MultiplexEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiplexEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for MultiplexEventSink {
    fn emit(&self, event: ResourceEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl fmt::Debug for MultiplexEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexEventSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}
