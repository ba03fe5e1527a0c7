//! Core orchestration for bogobench
//!
//! This crate provides the machinery that turns a catalog of workload
//! modules ("stressors") into a running fleet of child processes and a
//! final, integrity-checked report:
//!
//! - The stressor registry and module interface
//! - Run-plan construction from selection inputs
//! - The shared-memory statistics plane (stats, checksums, sentinel pages)
//! - Signal handling and fleet-wide shutdown
//! - The fleet scheduler (parallel / sequential / permute policies)
//! - Metrics aggregation and counter integrity checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod class;
pub mod config;
pub mod error;
pub mod exit;
pub mod fleet;
pub mod metrics;
pub mod plan;
pub mod registry;
pub mod rng;
pub mod shared;
pub mod signal;
pub mod system;

/// Core error types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::exit::ExitStatus;
}

/// Name of the application, used for process titles and log prefixes.
pub const APP_NAME: &str = "bogobench";
