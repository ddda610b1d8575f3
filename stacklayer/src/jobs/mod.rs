//! Job implementations for the executor framework.
//!
//! # Jobs
//!
//! - [`ChainJob`] - runs one provisioning chain and its completion hook
//!
//! # Hooks
//!
//! - [`Hook`] - success and failure continuations, including the cleanup
//!   rules for partially completed chains
//!
//! # Example
//!
//! ```ignore
//! use stacklayer::chains::{build_chain, ChainContext};
//! use stacklayer::jobs::ChainJob;
//!
//! let spec = build_chain(&ctx, &volume, &Operation::Create)?;
//! let handle = submitter.try_submit(ChainJob::new(spec, env.clone()));
//! ```

mod chain;
mod hooks;

pub use chain::ChainJob;
pub use hooks::Hook;
