//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (path, init, show)
//! - [`demo`] - End-to-end scenario against the simulated backend

pub mod config;
pub mod demo;
