//! Priority queue of ready tasks.

use super::job::JobId;
use super::policy::Priority;
use super::resource_pool::ResourceType;
use super::task::Task;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A task waiting for a resource permit.
pub(crate) struct QueuedTask {
    pub job_id: JobId,
    /// Index of the branch within the job's current stage.
    pub branch: usize,
    pub task: Box<dyn Task>,
    pub priority: Priority,
    pub resource_type: ResourceType,
    /// Run number the task will execute as, starting at 1.
    pub attempt: u32,
    sequence: u64,
}

impl QueuedTask {
    pub fn new(job_id: JobId, branch: usize, task: Box<dyn Task>, priority: Priority, attempt: u32) -> Self {
        let resource_type = task.resource_type();
        Self {
            job_id,
            branch,
            task,
            priority,
            resource_type,
            attempt,
            sequence: 0,
        }
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (older) first
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("job_id", &self.job_id)
            .field("task", &self.task.name())
            .field("priority", &self.priority)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Ready tasks ordered by priority, FIFO within a priority.
#[derive(Default)]
pub(crate) struct PriorityQueue {
    heap: BinaryHeap<QueuedTask>,
    next_sequence: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut task: QueuedTask) {
        task.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(task);
    }

    /// Puts back a task popped by the dispatcher, keeping its place in line.
    pub fn restore(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    /// Removes every queued task of `job_id`.
    pub fn drain_job(&mut self, job_id: &JobId) -> Vec<QueuedTask> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|t| &t.job_id == job_id);
        self.heap = BinaryHeap::from(kept);
        removed
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::TaskContext;
    use crate::executor::task::TaskResult;
    use std::future::Future;
    use std::pin::Pin;

    struct Named(String);

    impl Task for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn execute<'a>(
            &'a self,
            _ctx: &'a mut TaskContext,
        ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
            Box::pin(async { TaskResult::Success })
        }
    }

    fn queued(job: &str, name: &str, priority: Priority) -> QueuedTask {
        QueuedTask::new(JobId::new(job), 0, Box::new(Named(name.to_string())), priority, 1)
    }

    #[test]
    fn test_user_before_background() {
        let mut queue = PriorityQueue::new();
        queue.push(queued("bg", "schedule", Priority::BACKGROUND));
        queue.push(queued("user", "create", Priority::USER));

        assert_eq!(queue.pop().unwrap().task.name(), "create");
        assert_eq!(queue.pop().unwrap().task.name(), "schedule");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = PriorityQueue::new();
        for name in ["a", "b", "c"] {
            queue.push(queued("job", name, Priority::USER));
        }

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.task.name().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_restore_keeps_position() {
        let mut queue = PriorityQueue::new();
        queue.push(queued("job", "first", Priority::USER));
        queue.push(queued("job", "second", Priority::USER));

        let first = queue.pop().unwrap();
        queue.restore(first);
        assert_eq!(queue.pop().unwrap().task.name(), "first");
    }

    #[test]
    fn test_drain_job() {
        let mut queue = PriorityQueue::new();
        queue.push(queued("a", "a1", Priority::USER));
        queue.push(queued("b", "b1", Priority::USER));
        queue.push(queued("a", "a2", Priority::USER));

        let removed = queue.drain_job(&JobId::new("a"));
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().task.name(), "b1");
    }
}
