//! Job executor.
//!
//! Runs workflows ("jobs") made of barrier-separated stages of parallel task
//! sequences, with bounded concurrency per resource type, countdowns,
//! timer-based retries and fail-fast error handling.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       JobSubmitter                          │
//! │  Submit jobs, get handles for status and results            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       JobExecutor                           │
//! │  Event loop: submissions, completions, delayed arrivals     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Priority    │  │ Resource    │  │ Telemetry           │  │
//! │  │ Queue       │  │ Pools       │  │ Sink                │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Job**: builds its stages once when started and decides its final
//!   status in [`Job::on_complete`].
//! - **Task**: one async step. Declares a [`ResourceType`], an optional
//!   countdown and a [`RetryPolicy`].
//! - **Priority**: [`Priority::USER`] before [`Priority::BACKGROUND`], FIFO
//!   within a priority.
//!
//! ```ignore
//! let (executor, submitter) = JobExecutor::new(ExecutorConfig::default());
//! let shutdown = CancellationToken::new();
//! tokio::spawn(executor.run(shutdown.clone()));
//!
//! let mut handle = submitter.try_submit(my_job).unwrap();
//! let result = handle.wait().await;
//! ```

mod active_job;
mod config;
mod context;
mod core;
mod dispatch;
mod handle;
mod job;
mod lifecycle;
mod policy;
mod queue;
mod resource_pool;
mod submitter;
mod task;
mod telemetry;

pub use config::{ExecutorConfig, DEFAULT_JOB_CHANNEL_CAPACITY, DEFAULT_MAX_CONCURRENT_TASKS};
pub use context::TaskContext;
pub use core::JobExecutor;
pub use handle::{JobHandle, JobStatus};
pub use job::{Job, JobId, JobResult, Stage};
pub use policy::{Priority, RetryPolicy, PRIORITY_BACKGROUND, PRIORITY_USER};
pub use resource_pool::{
    ResourcePermit, ResourcePool, ResourcePoolConfig, ResourcePools, ResourceType,
    DEFAULT_BACKEND_CAPACITY, DEFAULT_REPOSITORY_CAPACITY,
};
pub use submitter::JobSubmitter;
pub use task::{Task, TaskError, TaskErrorKind, TaskResult, TaskResultKind};
pub use telemetry::{
    MultiplexTelemetrySink, NullTelemetrySink, TelemetryEvent, TelemetrySink,
    TracingTelemetrySink,
};
