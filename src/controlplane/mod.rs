//! Control Plane
//!
//! Everything that talks to the cluster management API: the adapters, the
//! fan-out resolver, snapshot and mutation operations, and the command
//! orchestrator that ties them to the host layer.

pub mod client;
pub mod commands;
pub mod health;
#[cfg(test)]
pub(crate) mod memory;
pub mod mutation;
pub mod parallel;
pub mod resolver;
pub mod snapshots;

pub use client::RestClusterApi;
pub use commands::{CommandOptions, Commands, Operation, Outcome, OutputFormat};
pub use health::{HealthCheck, HealthReport};
pub use parallel::{RunReport, TaskRunner};
pub use resolver::{Lookup, Resolver, ResolverConfig};
pub use snapshots::{SnapshotService, SnapshotSet};
