//! Executor configuration.

use super::resource_pool::ResourcePoolConfig;

/// Submission channel capacity; submissions beyond it are rejected.
pub const DEFAULT_JOB_CHANNEL_CAPACITY: usize = 256;

/// Cap on tasks running at once across all pools.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub resource_pools: ResourcePoolConfig,
    pub job_channel_capacity: usize,
    pub max_concurrent_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            resource_pools: ResourcePoolConfig::default(),
            job_channel_capacity: DEFAULT_JOB_CHANNEL_CAPACITY,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl From<&crate::config::ExecutorSettings> for ExecutorConfig {
    fn from(settings: &crate::config::ExecutorSettings) -> Self {
        Self {
            resource_pools: ResourcePoolConfig::from(settings),
            job_channel_capacity: settings.job_channel_capacity,
            max_concurrent_tasks: settings.max_concurrent_tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorSettings;

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.job_channel_capacity, DEFAULT_JOB_CHANNEL_CAPACITY);
        assert_eq!(config.max_concurrent_tasks, DEFAULT_MAX_CONCURRENT_TASKS);
    }

    #[test]
    fn test_from_settings() {
        let settings = ExecutorSettings {
            max_concurrent_tasks: 8,
            job_channel_capacity: 16,
            backend_concurrent: 2,
            repository_concurrent: 4,
        };
        let config = ExecutorConfig::from(&settings);

        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.job_channel_capacity, 16);
        assert_eq!(config.resource_pools, ResourcePoolConfig::new(2, 4));
    }
}
