//! dvot - Volume Operations Tool
//!
//! Finds, snapshots, rolls back and attaches the volumes of a remote
//! block-storage cluster from the host it runs on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Command Orchestrator                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Resource     │  │    Snapshot     │  │       Mutations             │  │
//! │  │    Resolver     │  │    Service      │  │  (extend/placement/repair)  │  │
//! │  │   (fan-out)     │  │                 │  │                             │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │   Cluster API (port)  │  REST / in-memory adapters     │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                           Attachment Manager                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  Initiator   │  │    iSCSI     │  │  Multipath   │  │  Format/Mount   │  │
//! │  │  + ACL       │  │  login/out   │  │  resolution  │  │  (idempotent)   │  │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └─────────────────┘  │
//! │                    ┌───────────────────────┐                                │
//! │                    │ Process Runner (port) │                                │
//! │                    └───────────────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Cluster adapters, resolver, snapshots, commands
//! - [`host`]: Initiator, iSCSI, multipath, filesystem and attach flows
//! - [`domain`]: Resource model, path grammar and ports
//! - [`config`]: Cluster connection configuration
//! - [`retry`]: Bounded retry and polling
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod host;
pub mod retry;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::ClusterConfig;

pub use controlplane::{
    CommandOptions, Commands, Lookup, Operation, Outcome, OutputFormat, Resolver, ResolverConfig,
    RestClusterApi, SnapshotService, SnapshotSet, TaskRunner,
};

pub use domain::ports::{ClusterApi, ClusterApiRef, ProcessRunner, ProcessRunnerRef};
pub use domain::{
    AppInstance, PlacementMode, RepairPriority, Resource, ResourceKind, ResourcePath, Snapshot,
    StorageInstance, Volume,
};

pub use error::{Error, FaultClass, Result};

pub use host::{AttachConfig, AttachOptions, AttachedDevice, AttachmentManager, ShellRunner};

pub use retry::RetryPolicy;

/// Exit code of a successful command
pub const SUCCESS: i32 = 0;

/// Exit code of a failed command
pub const FAILURE: i32 = 1;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
