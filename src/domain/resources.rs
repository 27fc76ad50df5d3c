//! Cluster Resources
//!
//! Typed views of the resources the cluster management API exposes. The core
//! only ever holds transient copies of these; the cluster owns them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational state reported once a resource is usable
pub const OP_STATE_AVAILABLE: &str = "available";

/// Tenant a session without an explicit tenant operates in
pub const ROOT_TENANT: &str = "/root";

// =============================================================================
// States
// =============================================================================

/// Administrative state of an AppInstance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    #[default]
    Online,
    Offline,
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminState::Online => write!(f, "online"),
            AdminState::Offline => write!(f, "offline"),
        }
    }
}

/// Volume placement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    Hybrid,
    SingleFlash,
    AllFlash,
}

impl fmt::Display for PlacementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementMode::Hybrid => write!(f, "hybrid"),
            PlacementMode::SingleFlash => write!(f, "single_flash"),
            PlacementMode::AllFlash => write!(f, "all_flash"),
        }
    }
}

impl std::str::FromStr for PlacementMode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(PlacementMode::Hybrid),
            "single_flash" => Ok(PlacementMode::SingleFlash),
            "all_flash" => Ok(PlacementMode::AllFlash),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "Unknown placement mode '{}', expected one of: hybrid, single_flash, all_flash",
                other
            ))),
        }
    }
}

/// Repair priority of an AppInstance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairPriority {
    High,
    Medium,
    Low,
}

impl fmt::Display for RepairPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairPriority::High => write!(f, "high"),
            RepairPriority::Medium => write!(f, "medium"),
            RepairPriority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for RepairPriority {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(RepairPriority::High),
            "medium" => Ok(RepairPriority::Medium),
            "low" => Ok(RepairPriority::Low),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "Unknown repair priority '{}', expected one of: high, medium, low",
                other
            ))),
        }
    }
}

// =============================================================================
// Resources
// =============================================================================

/// Top-level application instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInstance {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair_priority: Option<RepairPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

/// iSCSI access information of a storage instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    #[serde(default)]
    pub iqn: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Storage instance: the iSCSI target exported for an AppInstance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInstance {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub op_state: String,
    #[serde(default)]
    pub access: AccessInfo,
}

impl StorageInstance {
    /// Whether the target is ready for login
    pub fn is_available(&self) -> bool {
        self.op_state == OP_STATE_AVAILABLE
    }
}

/// A volume exported as one LUN of its storage instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub uuid: String,
    pub path: String,
    /// Size in GiB
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_mode: Option<PlacementMode>,
    #[serde(default)]
    pub replica_count: u32,
    #[serde(default)]
    pub op_state: String,
}

/// Point-in-time snapshot of an AppInstance or a Volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub uuid: String,
    pub utc_ts: String,
    pub path: String,
    #[serde(default)]
    pub op_state: String,
}

impl Snapshot {
    /// Whether the snapshot matches a timestamp or a uuid
    pub fn matches(&self, ts_or_uuid: &str) -> bool {
        self.utc_ts == ts_or_uuid || self.uuid == ts_or_uuid
    }

    /// Timestamp as a UTC date, when it parses as fractional epoch seconds
    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let (secs, frac) = match self.utc_ts.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (self.utc_ts.as_str(), "0"),
        };
        let secs: i64 = secs.parse().ok()?;
        let nanos: u32 = format!("{:0<9}", frac).get(..9)?.parse().ok()?;
        chrono::DateTime::from_timestamp(secs, nanos)
    }
}

/// Host initiator record registered in the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiator {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub tenant: Option<String>,
}

/// Access network path advertised by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPath {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
}

// =============================================================================
// Tagged Resource
// =============================================================================

/// Kind of a cluster resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    AppInstance,
    StorageInstance,
    Volume,
    Snapshot,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::AppInstance => write!(f, "AppInstance"),
            ResourceKind::StorageInstance => write!(f, "StorageInstance"),
            ResourceKind::Volume => write!(f, "Volume"),
            ResourceKind::Snapshot => write!(f, "Snapshot"),
        }
    }
}

/// A resolved cluster resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    AppInstance(AppInstance),
    StorageInstance(StorageInstance),
    Volume(Volume),
    Snapshot(Snapshot),
}

impl Resource {
    /// Kind tag of this resource
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::AppInstance(_) => ResourceKind::AppInstance,
            Resource::StorageInstance(_) => ResourceKind::StorageInstance,
            Resource::Volume(_) => ResourceKind::Volume,
            Resource::Snapshot(_) => ResourceKind::Snapshot,
        }
    }

    /// Cluster path of this resource
    pub fn path(&self) -> &str {
        match self {
            Resource::AppInstance(ai) => &ai.path,
            Resource::StorageInstance(si) => &si.path,
            Resource::Volume(vol) => &vol.path,
            Resource::Snapshot(snap) => &snap.path,
        }
    }

    /// Identifier: id for AppInstances, uuid for Volumes and Snapshots
    pub fn id(&self) -> &str {
        match self {
            Resource::AppInstance(ai) => &ai.id,
            Resource::StorageInstance(si) => &si.name,
            Resource::Volume(vol) => &vol.uuid,
            Resource::Snapshot(snap) => &snap.uuid,
        }
    }

    /// Display name; snapshots are named by their timestamp
    pub fn name(&self) -> &str {
        match self {
            Resource::AppInstance(ai) => &ai.name,
            Resource::StorageInstance(si) => &si.name,
            Resource::Volume(vol) => &vol.name,
            Resource::Snapshot(snap) => &snap.utc_ts,
        }
    }

    /// Admin state for AppInstances, operational state otherwise
    pub fn state(&self) -> String {
        match self {
            Resource::AppInstance(ai) => ai.admin_state.to_string(),
            Resource::StorageInstance(si) => si.op_state.clone(),
            Resource::Volume(vol) => vol.op_state.clone(),
            Resource::Snapshot(snap) => snap.op_state.clone(),
        }
    }

    /// Id of the AppInstance owning this resource
    pub fn app_instance_id(&self) -> crate::error::Result<String> {
        let path = crate::domain::path::ResourcePath::parse(self.path())?;
        Ok(path.app_instance().to_string())
    }
}

impl From<AppInstance> for Resource {
    fn from(ai: AppInstance) -> Self {
        Resource::AppInstance(ai)
    }
}

impl From<StorageInstance> for Resource {
    fn from(si: StorageInstance) -> Self {
        Resource::StorageInstance(si)
    }
}

impl From<Volume> for Resource {
    fn from(vol: Volume) -> Self {
        Resource::Volume(vol)
    }
}

impl From<Snapshot> for Resource {
    fn from(snap: Snapshot) -> Self {
        Resource::Snapshot(snap)
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// Fields settable on an AppInstance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppInstanceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_state: Option<AdminState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_priority: Option<RepairPriority>,
}

impl AppInstanceUpdate {
    /// Bring the AppInstance online
    pub fn online() -> Self {
        Self {
            admin_state: Some(AdminState::Online),
            ..Default::default()
        }
    }

    /// Force the AppInstance offline
    pub fn force_offline() -> Self {
        Self {
            admin_state: Some(AdminState::Offline),
            force: Some(true),
            ..Default::default()
        }
    }

    /// Restore the AppInstance to a snapshot timestamp
    pub fn restore_point(ts: impl Into<String>) -> Self {
        Self {
            restore_point: Some(ts.into()),
            ..Default::default()
        }
    }
}

/// Fields settable on a Volume
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_mode: Option<PlacementMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_point: Option<String>,
}

/// Request to create an AppInstance cloned from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAppInstance {
    pub name: String,
    pub clone_snapshot_src: CloneSource,
}

/// Source path for a clone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneSource {
    pub path: String,
}
