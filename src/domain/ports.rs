//! Domain Ports - Core trait definitions
//!
//! These traits define the boundaries between the resolution / attachment
//! logic and the outside world: the cluster management API and the host's
//! shell. Adapters implement these traits to provide concrete functionality.

use crate::domain::resources::{
    AppInstance, AppInstanceUpdate, Initiator, NetworkPath, NewAppInstance, Snapshot,
    StorageInstance, Volume, VolumeUpdate,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Cluster API Port
// =============================================================================

/// Port for the cluster management API
///
/// Lookups of a single resource fail with [`crate::Error::NotFound`] when the
/// resource does not exist; creations and registrations fail with
/// [`crate::Error::Conflict`] when it already does.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Tenant the session operates in, if any
    fn tenant(&self) -> Option<&str>;

    /// List every AppInstance visible to the tenant
    async fn list_app_instances(&self) -> Result<Vec<AppInstance>>;

    /// Get an AppInstance by id
    async fn get_app_instance(&self, id: &str) -> Result<AppInstance>;

    /// Create an AppInstance
    async fn create_app_instance(&self, request: &NewAppInstance) -> Result<AppInstance>;

    /// Set fields on an AppInstance
    async fn update_app_instance(
        &self,
        ai: &AppInstance,
        update: &AppInstanceUpdate,
    ) -> Result<AppInstance>;

    /// List the StorageInstances of an AppInstance
    async fn list_storage_instances(&self, ai: &AppInstance) -> Result<Vec<StorageInstance>>;

    /// Get a StorageInstance by AppInstance id and StorageInstance name
    async fn get_storage_instance(&self, ai_id: &str, si_id: &str) -> Result<StorageInstance>;

    /// List the Volumes of a StorageInstance, in LUN order
    async fn list_volumes(&self, si: &StorageInstance) -> Result<Vec<Volume>>;

    /// Get a Volume by its owning ids and its name
    async fn get_volume(&self, ai_id: &str, si_id: &str, vol_id: &str) -> Result<Volume>;

    /// Set fields on a Volume
    async fn update_volume(&self, vol: &Volume, update: &VolumeUpdate) -> Result<Volume>;

    /// List snapshots under an AppInstance or Volume path
    async fn list_snapshots(&self, parent_path: &str) -> Result<Vec<Snapshot>>;

    /// Create a snapshot under an AppInstance or Volume path
    async fn create_snapshot(&self, parent_path: &str) -> Result<Snapshot>;

    /// Get an initiator by its iSCSI name
    async fn get_initiator(&self, id: &str) -> Result<Initiator>;

    /// Register an initiator
    async fn create_initiator(&self, name: &str, id: &str) -> Result<Initiator>;

    /// Add an initiator to a StorageInstance ACL policy
    async fn add_acl_initiator(&self, si: &StorageInstance, initiator: &Initiator) -> Result<()>;

    /// Access network paths of the cluster
    async fn access_network_paths(&self) -> Result<Vec<NetworkPath>>;
}

// =============================================================================
// Process Runner Port
// =============================================================================

/// Port for running shell commands on the local host
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command and return its stdout, failing on non-zero exit
    async fn run(&self, command: &str) -> Result<String>;

    /// Run a command, logging and swallowing any failure
    async fn run_fail_ok(&self, command: &str) -> Option<String> {
        match self.run(command).await {
            Ok(out) => Some(out),
            Err(e) => {
                debug!("Ignoring failed command: {}", e);
                None
            }
        }
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterApiRef = Arc<dyn ClusterApi>;
pub type ProcessRunnerRef = Arc<dyn ProcessRunner>;
