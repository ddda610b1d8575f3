//! StackLayer - asynchronous provisioning of cloud resources
//!
//! This library drives OpenStack-style resources (tenants, networks,
//! instances, volumes, snapshots, backups, floating IPs) through their
//! lifecycle. Every user operation becomes a chain of small tasks run by a
//! priority executor, with a completion hook that settles the final state.
//!
//! # High-Level API
//!
//! For most use cases, the [`orchestrator`] module provides the entry point:
//!
//! ```ignore
//! use stacklayer::orchestrator::{Operation, Orchestrator};
//!
//! let (executor, submitter) = JobExecutor::new(ExecutorConfig::default());
//! let orchestrator = Orchestrator::new(env, submitter);
//!
//! let handle = orchestrator.execute(volume_id, Operation::Extend { new_size: 2048 })?;
//! handle.wait().await;
//! ```

pub mod backend;
pub mod background;
pub mod chains;
pub mod config;
pub mod events;
pub mod executor;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod repository;
pub mod tasks;

/// Version of the StackLayer library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
