//! Resource pools for task concurrency control.
//!
//! Tasks declare which resource type they need, and the executor takes a
//! permit from the matching pool before dispatching. Pools only cap
//! concurrency; ordering is the task queue's job.
//!
//! - [`ResourceType::Backend`]: calls against the cloud API (32 concurrent)
//! - [`ResourceType::Repository`]: state transitions and bookkeeping (64 concurrent)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_BACKEND_CAPACITY: usize = 32;

pub const DEFAULT_REPOSITORY_CAPACITY: usize = 64;

/// Kind of resource a task consumes while it runs.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ResourceType {
    Backend,
    Repository,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "Backend"),
            Self::Repository => write!(f, "Repository"),
        }
    }
}

/// Semaphore-backed pool for one resource type.
#[derive(Debug)]
pub struct ResourcePool {
    resource_type: ResourceType,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
}

impl ResourcePool {
    /// Creates a pool; a zero capacity is raised to one.
    pub fn new(resource_type: ResourceType, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            resource_type,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Takes a permit without waiting.
    pub fn try_acquire(&self) -> Option<ResourcePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;

        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.update_peak(current);

        Some(ResourcePermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
            resource_type: self.resource_type,
        })
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

/// RAII permit; releases its slot on drop.
pub struct ResourcePermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    resource_type: ResourceType,
}

impl ResourcePermit {
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
}

impl Drop for ResourcePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ResourcePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePermit")
            .field("resource_type", &self.resource_type)
            .finish()
    }
}

/// Pool capacities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePoolConfig {
    pub backend: usize,
    pub repository: usize,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND_CAPACITY,
            repository: DEFAULT_REPOSITORY_CAPACITY,
        }
    }
}

impl ResourcePoolConfig {
    pub fn new(backend: usize, repository: usize) -> Self {
        Self {
            backend,
            repository,
        }
    }
}

impl From<&crate::config::ExecutorSettings> for ResourcePoolConfig {
    fn from(settings: &crate::config::ExecutorSettings) -> Self {
        Self {
            backend: settings.backend_concurrent,
            repository: settings.repository_concurrent,
        }
    }
}

/// One pool per resource type.
#[derive(Debug)]
pub struct ResourcePools {
    backend: ResourcePool,
    repository: ResourcePool,
}

impl ResourcePools {
    pub fn new(config: ResourcePoolConfig) -> Self {
        Self {
            backend: ResourcePool::new(ResourceType::Backend, config.backend),
            repository: ResourcePool::new(ResourceType::Repository, config.repository),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ResourcePoolConfig::default())
    }

    pub fn get(&self, resource_type: ResourceType) -> &ResourcePool {
        match resource_type {
            ResourceType::Backend => &self.backend,
            ResourceType::Repository => &self.repository,
        }
    }

    pub fn try_acquire(&self, resource_type: ResourceType) -> Option<ResourcePermit> {
        self.get(resource_type).try_acquire()
    }

    pub fn available(&self, resource_type: ResourceType) -> usize {
        self.get(resource_type).available()
    }

    pub fn capacity(&self, resource_type: ResourceType) -> usize {
        self.get(resource_type).capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_released_on_drop() {
        let pool = ResourcePool::new(ResourceType::Backend, 2);

        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.peak_in_flight(), 2);
        assert_eq!(b.resource_type(), ResourceType::Backend);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let pool = ResourcePool::new(ResourceType::Repository, 0);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_pools_are_independent() {
        let pools = ResourcePools::new(ResourcePoolConfig::new(1, 3));
        let _held = pools.try_acquire(ResourceType::Backend).unwrap();

        assert!(pools.try_acquire(ResourceType::Backend).is_none());
        assert_eq!(pools.available(ResourceType::Repository), 3);
        assert_eq!(pools.capacity(ResourceType::Backend), 1);
    }

    #[test]
    fn test_default_capacities() {
        let config = ResourcePoolConfig::default();
        assert_eq!(config.backend, DEFAULT_BACKEND_CAPACITY);
        assert_eq!(config.repository, DEFAULT_REPOSITORY_CAPACITY);
    }
}
