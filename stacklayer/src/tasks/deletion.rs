//! Row deletion.
//!
//! The last step of a delete chain. Releases the resource's quota through
//! the repository; a row that is already gone counts as deleted.

use super::{repository_failure, SharedEnv};
use crate::executor::{Task, TaskContext, TaskResult};
use crate::model::ResourceId;
use crate::repository::RepositoryError;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

pub struct DeletionTask {
    env: SharedEnv,
    name: String,
    resource: ResourceId,
}

impl DeletionTask {
    pub fn new(env: SharedEnv, name: String, resource: ResourceId) -> Self {
        Self {
            env,
            name,
            resource,
        }
    }
}

impl Task for DeletionTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut TaskContext,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return TaskResult::Cancelled;
            }
            match self.env.delete(self.resource) {
                Ok(_) => TaskResult::Success,
                Err(RepositoryError::NotFound(_)) => {
                    debug!(resource_id = %self.resource, "Row already deleted");
                    TaskResult::Success
                }
                Err(e) => TaskResult::Failed(repository_failure(e)),
            }
        })
    }
}
