//! Telemetry for job execution observability.
//!
//! The executor emits structured events through a [`TelemetrySink`] and does
//! not know how they are consumed. Resource-level events (state changes,
//! quota) are a separate stream, see [`crate::events`].

use super::handle::JobStatus;
use super::job::JobId;
use super::policy::Priority;
use super::resource_pool::ResourceType;
use super::task::TaskResultKind;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    JobSubmitted {
        job_id: JobId,
        name: String,
        priority: Priority,
    },

    JobStarted {
        job_id: JobId,
        stages: usize,
    },

    JobCompleted {
        job_id: JobId,
        status: JobStatus,
        duration: Duration,
        tasks_succeeded: usize,
        tasks_failed: usize,
        tasks_cancelled: usize,
    },

    /// A stage barrier was passed and the next stage's branches were released.
    StageStarted {
        job_id: JobId,
        stage: usize,
        branches: usize,
    },

    TaskStarted {
        job_id: JobId,
        task_name: String,
        resource_type: ResourceType,
        attempt: u32,
    },

    TaskCompleted {
        job_id: JobId,
        task_name: String,
        result: TaskResultKind,
        duration: Duration,
    },

    TaskRetrying {
        job_id: JobId,
        task_name: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },

    /// A task with a countdown was parked on a timer.
    TaskDelayed {
        job_id: JobId,
        task_name: String,
        countdown: Duration,
    },

    TaskEnqueued {
        job_id: JobId,
        task_name: String,
        priority: Priority,
        queue_depth: usize,
    },

    ResourcePoolExhausted {
        resource_type: ResourceType,
        waiting_tasks: usize,
    },
}

impl TelemetryEvent {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobSubmitted { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::StageStarted { job_id, .. }
            | Self::TaskStarted { job_id, .. }
            | Self::TaskCompleted { job_id, .. }
            | Self::TaskRetrying { job_id, .. }
            | Self::TaskDelayed { job_id, .. }
            | Self::TaskEnqueued { job_id, .. } => Some(job_id),
            Self::ResourcePoolExhausted { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobSubmitted { .. } => "job_submitted",
            Self::JobStarted { .. } => "job_started",
            Self::JobCompleted { .. } => "job_completed",
            Self::StageStarted { .. } => "stage_started",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskRetrying { .. } => "task_retrying",
            Self::TaskDelayed { .. } => "task_delayed",
            Self::TaskEnqueued { .. } => "task_enqueued",
            Self::ResourcePoolExhausted { .. } => "resource_pool_exhausted",
        }
    }
}

/// Receiver of executor telemetry.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JobSubmitted { name, priority, .. } => {
                write!(f, "Chain \"{}\" submitted at {} priority", name, priority)
            }
            Self::JobStarted { stages, .. } => write!(f, "Chain started with {} stage(s)", stages),
            Self::JobCompleted {
                status,
                duration,
                tasks_succeeded,
                tasks_failed,
                tasks_cancelled,
                ..
            } => write!(
                f,
                "Chain {} after {}ms ({} ok, {} failed, {} cancelled)",
                status,
                duration.as_millis(),
                tasks_succeeded,
                tasks_failed,
                tasks_cancelled
            ),
            Self::StageStarted { stage, branches, .. } => {
                write!(f, "Stage {} released {} branch(es)", stage, branches)
            }
            Self::TaskStarted {
                task_name,
                resource_type,
                attempt,
                ..
            } => write!(f, "{} started on {} pool, run {}", task_name, resource_type, attempt),
            Self::TaskCompleted {
                task_name,
                result,
                duration,
                ..
            } => write!(f, "{} finished {:?} in {}ms", task_name, result, duration.as_millis()),
            Self::TaskRetrying {
                task_name,
                attempt,
                delay,
                reason,
                ..
            } => write!(
                f,
                "{} retry {} in {}ms: {}",
                task_name,
                attempt,
                delay.as_millis(),
                reason
            ),
            Self::TaskDelayed {
                task_name,
                countdown,
                ..
            } => write!(f, "{} waits {}ms before its first run", task_name, countdown.as_millis()),
            Self::TaskEnqueued {
                task_name,
                priority,
                queue_depth,
                ..
            } => write!(f, "{} queued at {} ({} waiting)", task_name, priority, queue_depth),
            Self::ResourcePoolExhausted {
                resource_type,
                waiting_tasks,
            } => write!(f, "{} pool exhausted, {} task(s) waiting", resource_type, waiting_tasks),
        }
    }
}

/// Logs events through `tracing`: chain milestones at debug, per-task
/// bookkeeping at trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        let job_id = event.job_id().map(JobId::as_str).unwrap_or("-");
        let kind = event.event_type();
        match &event {
            TelemetryEvent::JobSubmitted { .. }
            | TelemetryEvent::JobStarted { .. }
            | TelemetryEvent::JobCompleted { .. }
            | TelemetryEvent::TaskRetrying { .. }
            | TelemetryEvent::ResourcePoolExhausted { .. } => {
                tracing::debug!(job_id = %job_id, event = kind, "{}", event)
            }
            _ => tracing::trace!(job_id = %job_id, event = kind, "{}", event),
        }
    }
}

/// Fans events out to several sinks.
pub struct MultiplexTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiplexTelemetrySink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }
}

impl TelemetrySink for MultiplexTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl fmt::Debug for MultiplexTelemetrySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexTelemetrySink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_job_id() {
        let job_id = JobId::new("test-job");

        let event = TelemetryEvent::JobStarted {
            job_id: job_id.clone(),
            stages: 2,
        };
        assert_eq!(event.job_id(), Some(&job_id));

        let event = TelemetryEvent::ResourcePoolExhausted {
            resource_type: ResourceType::Backend,
            waiting_tasks: 5,
        };
        assert_eq!(event.job_id(), None);
    }

    #[test]
    fn test_event_type_names() {
        let event = TelemetryEvent::TaskRetrying {
            job_id: JobId::new("x"),
            task_name: "poll".to_string(),
            attempt: 2,
            delay: Duration::from_secs(5),
            reason: "creating".to_string(),
        };
        assert_eq!(event.event_type(), "task_retrying");
        assert_eq!(event.to_string(), "poll retry 2 in 5000ms: creating");

        let event = TelemetryEvent::TaskCompleted {
            job_id: JobId::new("x"),
            task_name: "y".to_string(),
            result: TaskResultKind::Success,
            duration: Duration::ZERO,
        };
        assert_eq!(event.event_type(), "task_completed");
    }

    #[test]
    fn test_multiplex_sink() {
        struct CountingSink(AtomicUsize);

        impl TelemetrySink for CountingSink {
            fn emit(&self, _event: TelemetryEvent) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let sink1 = Arc::new(CountingSink(AtomicUsize::new(0)));
        let sink2 = Arc::new(CountingSink(AtomicUsize::new(0)));

        let mut multiplex =
            MultiplexTelemetrySink::new(vec![Arc::clone(&sink1) as Arc<dyn TelemetrySink>]);
        multiplex.add_sink(Arc::clone(&sink2) as Arc<dyn TelemetrySink>);

        multiplex.emit(TelemetryEvent::JobStarted {
            job_id: JobId::new("test"),
            stages: 1,
        });
        TracingTelemetrySink.emit(TelemetryEvent::JobStarted {
            job_id: JobId::new("test"),
            stages: 1,
        });

        assert_eq!(sink1.0.load(Ordering::Relaxed), 1);
        assert_eq!(sink2.0.load(Ordering::Relaxed), 1);
    }
}
