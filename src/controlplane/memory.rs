//! In-Memory Cluster
//!
//! Test double for [`ClusterApi`] that keeps the resource tree in process.
//! Records call counts and mutations, and can inject latency and
//! transitional operational states.

use crate::domain::ports::ClusterApi;
use crate::domain::resources::{
    AccessInfo, AdminState, AppInstance, AppInstanceUpdate, Initiator, NetworkPath,
    NewAppInstance, Snapshot, StorageInstance, Volume, VolumeUpdate, OP_STATE_AVAILABLE,
    ROOT_TENANT,
};
use crate::domain::ResourcePath;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Resource Tree
// =============================================================================

#[derive(Debug, Clone)]
struct VolumeNode {
    volume: Volume,
    snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone)]
struct StoredInstance {
    si: StorageInstance,
    volumes: Vec<VolumeNode>,
    acl: Vec<String>,
    /// States handed out by successive gets before settling
    pending_states: VecDeque<String>,
}

#[derive(Debug, Clone)]
struct AppNode {
    ai: AppInstance,
    storage: Vec<StoredInstance>,
    snapshots: Vec<Snapshot>,
    latency: Option<Duration>,
}

impl AppNode {
    fn storage(&self, si_id: &str) -> Result<&StoredInstance> {
        self.storage
            .iter()
            .find(|node| node.si.name == si_id)
            .ok_or_else(|| Error::not_found("StorageInstance", format!("{}/{}", self.ai.id, si_id)))
    }

    fn storage_mut(&mut self, si_id: &str) -> Result<&mut StoredInstance> {
        let ai_id = self.ai.id.clone();
        self.storage
            .iter_mut()
            .find(|node| node.si.name == si_id)
            .ok_or_else(|| Error::not_found("StorageInstance", format!("{}/{}", ai_id, si_id)))
    }
}

impl StoredInstance {
    fn volume_mut(&mut self, vol_id: &str) -> Result<&mut VolumeNode> {
        let path = self.si.path.clone();
        self.volumes
            .iter_mut()
            .find(|node| node.volume.name == vol_id || node.volume.uuid == vol_id)
            .ok_or_else(|| Error::not_found("Volume", format!("{}/volumes/{}", path, vol_id)))
    }
}

// =============================================================================
// In-Memory Cluster
// =============================================================================

/// Cluster API backed by an in-process resource tree
pub struct InMemoryCluster {
    tenant: Option<String>,
    apps: DashMap<String, AppNode>,
    initiators: Mutex<Vec<Initiator>>,
    initiator_latency: Mutex<Option<Duration>>,
    initiator_creates: AtomicU64,
    network_paths: Mutex<Vec<NetworkPath>>,
    calls: AtomicU64,
    mutations: Mutex<Vec<String>>,
    snapshot_seq: AtomicU64,
}

impl InMemoryCluster {
    /// Create an empty cluster in the root tenant
    pub fn new() -> Self {
        Self {
            tenant: None,
            apps: DashMap::new(),
            initiators: Mutex::new(Vec::new()),
            initiator_latency: Mutex::new(None),
            initiator_creates: AtomicU64::new(0),
            network_paths: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
            mutations: Mutex::new(Vec::new()),
            snapshot_seq: AtomicU64::new(0),
        }
    }

    /// Scope the session to a tenant
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Add an online AppInstance
    pub fn add_app_instance(&self, id: &str, name: &str) -> AppInstance {
        let ai = AppInstance {
            id: id.to_string(),
            name: name.to_string(),
            path: ResourcePath::AppInstance { ai: id.to_string() }.to_string(),
            admin_state: AdminState::Online,
            repair_priority: None,
            tenant: self.tenant.clone(),
        };
        self.apps.insert(
            id.to_string(),
            AppNode {
                ai: ai.clone(),
                storage: Vec::new(),
                snapshots: Vec::new(),
                latency: None,
            },
        );
        ai
    }

    /// Add an available StorageInstance exported on `ips`
    pub fn add_storage_instance(&self, ai_id: &str, name: &str, iqn: &str, ips: &[&str]) -> StorageInstance {
        let si = StorageInstance {
            name: name.to_string(),
            path: ResourcePath::StorageInstance {
                ai: ai_id.to_string(),
                si: name.to_string(),
            }
            .to_string(),
            op_state: OP_STATE_AVAILABLE.to_string(),
            access: AccessInfo {
                iqn: (!iqn.is_empty()).then(|| iqn.to_string()),
                ips: ips.iter().map(|ip| ip.to_string()).collect(),
            },
        };
        if let Some(mut app) = self.apps.get_mut(ai_id) {
            app.storage.push(StoredInstance {
                si: si.clone(),
                volumes: Vec::new(),
                acl: Vec::new(),
                pending_states: VecDeque::new(),
            });
        }
        si
    }

    /// Add a Volume as the next LUN of a StorageInstance
    pub fn add_volume(&self, ai_id: &str, si_id: &str, name: &str, uuid: &str, size: u64) -> Volume {
        let volume = Volume {
            name: name.to_string(),
            uuid: uuid.to_string(),
            path: ResourcePath::Volume {
                ai: ai_id.to_string(),
                si: si_id.to_string(),
                vol: name.to_string(),
            }
            .to_string(),
            size,
            placement_mode: None,
            replica_count: 3,
            op_state: OP_STATE_AVAILABLE.to_string(),
        };
        if let Some(mut app) = self.apps.get_mut(ai_id) {
            if let Ok(node) = app.storage_mut(si_id) {
                node.volumes.push(VolumeNode {
                    volume: volume.clone(),
                    snapshots: Vec::new(),
                });
            }
        }
        volume
    }

    /// Add an AppInstance-level snapshot
    pub fn add_app_snapshot(&self, ai_id: &str, ts: &str, uuid: &str) -> Snapshot {
        let snap = Snapshot {
            uuid: uuid.to_string(),
            utc_ts: ts.to_string(),
            path: ResourcePath::AppSnapshot {
                ai: ai_id.to_string(),
                ts: ts.to_string(),
            }
            .to_string(),
            op_state: OP_STATE_AVAILABLE.to_string(),
        };
        if let Some(mut app) = self.apps.get_mut(ai_id) {
            app.snapshots.push(snap.clone());
        }
        snap
    }

    /// Add a Volume-level snapshot
    pub fn add_volume_snapshot(&self, ai_id: &str, si_id: &str, vol_id: &str, ts: &str, uuid: &str) -> Snapshot {
        let snap = Snapshot {
            uuid: uuid.to_string(),
            utc_ts: ts.to_string(),
            path: ResourcePath::VolumeSnapshot {
                ai: ai_id.to_string(),
                si: si_id.to_string(),
                vol: vol_id.to_string(),
                ts: ts.to_string(),
            }
            .to_string(),
            op_state: OP_STATE_AVAILABLE.to_string(),
        };
        if let Some(mut app) = self.apps.get_mut(ai_id) {
            if let Ok(node) = app.storage_mut(si_id) {
                if let Ok(vol) = node.volume_mut(vol_id) {
                    vol.snapshots.push(snap.clone());
                }
            }
        }
        snap
    }

    /// Register an initiator owned by `tenant`
    pub fn add_initiator(&self, id: &str, name: &str, tenant: &str) -> Initiator {
        let initiator = Initiator {
            id: id.to_string(),
            name: name.to_string(),
            path: format!("/initiators/{}", id),
            tenant: Some(tenant.to_string()),
        };
        self.initiators.lock().push(initiator.clone());
        initiator
    }

    /// Set the access network paths
    pub fn set_network_paths(&self, paths: Vec<NetworkPath>) {
        *self.network_paths.lock() = paths;
    }

    /// Make the next gets of a StorageInstance report `states` before it
    /// settles on its current state
    pub fn set_pending_states(&self, ai_id: &str, si_id: &str, states: &[&str]) {
        if let Some(mut app) = self.apps.get_mut(ai_id) {
            if let Ok(node) = app.storage_mut(si_id) {
                node.pending_states = states.iter().map(|s| s.to_string()).collect();
            }
        }
    }

    /// Delay every child listing of an AppInstance
    pub fn set_latency(&self, ai_id: &str, latency: Duration) {
        if let Some(mut app) = self.apps.get_mut(ai_id) {
            app.latency = Some(latency);
        }
    }

    /// Delay every initiator lookup and creation
    pub fn set_initiator_latency(&self, latency: Duration) {
        *self.initiator_latency.lock() = Some(latency);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Number of API calls served
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Mutations applied, as `<path> <json fields>` lines
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().clone()
    }

    /// Transitional states a StorageInstance has yet to report
    pub fn pending_state_count(&self, ai_id: &str, si_id: &str) -> usize {
        self.apps
            .get(ai_id)
            .and_then(|app| app.storage(si_id).ok().map(|node| node.pending_states.len()))
            .unwrap_or_default()
    }

    /// Initiator paths in a StorageInstance ACL
    pub fn acl(&self, ai_id: &str, si_id: &str) -> Vec<String> {
        self.apps
            .get(ai_id)
            .and_then(|app| app.storage(si_id).ok().map(|node| node.acl.clone()))
            .unwrap_or_default()
    }

    /// Number of create_initiator calls served
    pub fn initiator_create_count(&self) -> u64 {
        self.initiator_creates.load(Ordering::SeqCst)
    }

    /// All registered initiators
    pub fn initiators(&self) -> Vec<Initiator> {
        self.initiators.lock().clone()
    }

    /// Ids of all AppInstances
    pub fn app_instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.apps.iter().map(|app| app.key().clone()).collect();
        ids.sort();
        ids
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn record(&self, path: &str, fields: &impl serde::Serialize) {
        let fields = serde_json::to_string(fields).unwrap_or_default();
        debug!("in-memory cluster: set {} {}", path, fields);
        self.mutations.lock().push(format!("{} {}", path, fields));
    }

    async fn delay(&self, ai_id: &str) {
        let latency = self.apps.get(ai_id).and_then(|app| app.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn initiator_delay(&self) {
        let latency = *self.initiator_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn app(&self, ai_id: &str) -> Result<AppNode> {
        self.apps
            .get(ai_id)
            .map(|app| app.clone())
            .ok_or_else(|| Error::not_found("AppInstance", ai_id))
    }

    fn session_tenant(&self) -> &str {
        self.tenant.as_deref().unwrap_or(ROOT_TENANT)
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    async fn list_app_instances(&self) -> Result<Vec<AppInstance>> {
        self.touch();
        let mut ais: Vec<AppInstance> = self.apps.iter().map(|app| app.ai.clone()).collect();
        ais.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ais)
    }

    async fn get_app_instance(&self, id: &str) -> Result<AppInstance> {
        self.touch();
        Ok(self.app(id)?.ai)
    }

    async fn create_app_instance(&self, request: &NewAppInstance) -> Result<AppInstance> {
        self.touch();
        if self.apps.iter().any(|app| app.ai.name == request.name) {
            return Err(Error::Conflict {
                kind: "AppInstance".into(),
                name: request.name.clone(),
            });
        }

        let source = ResourcePath::parse_snapshot(&request.clone_snapshot_src.path)?;
        let parent = self.app(source.app_instance())?;
        let id = uuid::Uuid::new_v4().to_string();
        let ai = self.add_app_instance(&id, &request.name);

        for node in &parent.storage {
            let iqn = node
                .si
                .access
                .iqn
                .as_ref()
                .map(|iqn| format!("{}-{}", iqn, &id[..8]))
                .unwrap_or_default();
            let ips: Vec<&str> = node.si.access.ips.iter().map(String::as_str).collect();
            self.add_storage_instance(&id, &node.si.name, &iqn, &ips);
            for vol in &node.volumes {
                self.add_volume(
                    &id,
                    &node.si.name,
                    &vol.volume.name,
                    &uuid::Uuid::new_v4().to_string(),
                    vol.volume.size,
                );
            }
        }
        self.record(&ai.path, &request);
        Ok(ai)
    }

    async fn update_app_instance(&self, ai: &AppInstance, update: &AppInstanceUpdate) -> Result<AppInstance> {
        self.touch();
        let mut app = self
            .apps
            .get_mut(&ai.id)
            .ok_or_else(|| Error::not_found("AppInstance", &ai.id))?;
        if let Some(state) = update.admin_state {
            app.ai.admin_state = state;
        }
        if let Some(priority) = update.repair_priority {
            app.ai.repair_priority = Some(priority);
        }
        let updated = app.ai.clone();
        drop(app);
        self.record(&ai.path, update);
        Ok(updated)
    }

    async fn list_storage_instances(&self, ai: &AppInstance) -> Result<Vec<StorageInstance>> {
        self.touch();
        self.delay(&ai.id).await;
        Ok(self.app(&ai.id)?.storage.into_iter().map(|node| node.si).collect())
    }

    async fn get_storage_instance(&self, ai_id: &str, si_id: &str) -> Result<StorageInstance> {
        self.touch();
        let mut app = self
            .apps
            .get_mut(ai_id)
            .ok_or_else(|| Error::not_found("AppInstance", ai_id))?;
        let node = app.storage_mut(si_id)?;
        let mut si = node.si.clone();
        if let Some(state) = node.pending_states.pop_front() {
            si.op_state = state;
        }
        Ok(si)
    }

    async fn list_volumes(&self, si: &StorageInstance) -> Result<Vec<Volume>> {
        self.touch();
        let path = ResourcePath::parse(&si.path)?;
        let ResourcePath::StorageInstance { ai, si: si_id } = path else {
            return Err(Error::MalformedPath(si.path.clone()));
        };
        self.delay(&ai).await;
        let app = self.app(&ai)?;
        Ok(app.storage(&si_id)?.volumes.iter().map(|node| node.volume.clone()).collect())
    }

    async fn get_volume(&self, ai_id: &str, si_id: &str, vol_id: &str) -> Result<Volume> {
        self.touch();
        let mut app = self
            .apps
            .get_mut(ai_id)
            .ok_or_else(|| Error::not_found("AppInstance", ai_id))?;
        Ok(app.storage_mut(si_id)?.volume_mut(vol_id)?.volume.clone())
    }

    async fn update_volume(&self, vol: &Volume, update: &VolumeUpdate) -> Result<Volume> {
        self.touch();
        let ResourcePath::Volume { ai, si, vol: vol_id } = ResourcePath::parse(&vol.path)? else {
            return Err(Error::MalformedPath(vol.path.clone()));
        };
        let mut app = self
            .apps
            .get_mut(&ai)
            .ok_or_else(|| Error::not_found("AppInstance", &ai))?;
        let node = app.storage_mut(&si)?.volume_mut(&vol_id)?;
        if let Some(size) = update.size {
            node.volume.size = size;
        }
        if let Some(mode) = update.placement_mode {
            node.volume.placement_mode = Some(mode);
        }
        let updated = node.volume.clone();
        drop(app);
        self.record(&vol.path, update);
        Ok(updated)
    }

    async fn list_snapshots(&self, parent_path: &str) -> Result<Vec<Snapshot>> {
        self.touch();
        let parent = ResourcePath::parse(parent_path)?;
        self.delay(parent.app_instance()).await;
        let app = self.app(parent.app_instance())?;
        match parent {
            ResourcePath::AppInstance { .. } => Ok(app.snapshots),
            ResourcePath::Volume { si, vol, .. } => {
                let node = app.storage(&si)?;
                node.volumes
                    .iter()
                    .find(|node| node.volume.name == vol)
                    .map(|node| node.snapshots.clone())
                    .ok_or_else(|| Error::not_found("Volume", parent_path))
            }
            _ => Err(Error::InvalidArgument(format!(
                "{} cannot hold snapshots",
                parent_path
            ))),
        }
    }

    async fn create_snapshot(&self, parent_path: &str) -> Result<Snapshot> {
        self.touch();
        let seq = self.snapshot_seq.fetch_add(1, Ordering::SeqCst);
        let ts = format!("{}.{:09}", chrono::Utc::now().timestamp(), seq);
        let uuid = uuid::Uuid::new_v4().to_string();
        let snap = match ResourcePath::parse(parent_path)? {
            ResourcePath::AppInstance { ai } => {
                self.app(&ai)?;
                self.add_app_snapshot(&ai, &ts, &uuid)
            }
            ResourcePath::Volume { ai, si, vol } => {
                self.app(&ai)?.storage(&si)?;
                self.add_volume_snapshot(&ai, &si, &vol, &ts, &uuid)
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "{} cannot hold snapshots",
                    parent_path
                )))
            }
        };
        self.record(&snap.path, &HashMap::from([("op", "create")]));
        Ok(snap)
    }

    async fn get_initiator(&self, id: &str) -> Result<Initiator> {
        self.touch();
        self.initiator_delay().await;
        let tenant = self.session_tenant();
        let initiators = self.initiators.lock();
        initiators
            .iter()
            .find(|i| i.id == id && i.tenant.as_deref() == Some(tenant))
            .or_else(|| initiators.iter().find(|i| i.id == id))
            .cloned()
            .ok_or_else(|| Error::not_found("Initiator", id))
    }

    async fn create_initiator(&self, name: &str, id: &str) -> Result<Initiator> {
        self.touch();
        self.initiator_creates.fetch_add(1, Ordering::SeqCst);
        self.initiator_delay().await;
        let tenant = self.session_tenant().to_string();
        if self
            .initiators
            .lock()
            .iter()
            .any(|i| i.id == id && i.tenant.as_deref() == Some(tenant.as_str()))
        {
            return Err(Error::Conflict {
                kind: "Initiator".into(),
                name: id.to_string(),
            });
        }
        Ok(self.add_initiator(id, name, &tenant))
    }

    async fn add_acl_initiator(&self, si: &StorageInstance, initiator: &Initiator) -> Result<()> {
        self.touch();
        let ResourcePath::StorageInstance { ai, si: si_id } = ResourcePath::parse(&si.path)? else {
            return Err(Error::MalformedPath(si.path.clone()));
        };
        let mut app = self
            .apps
            .get_mut(&ai)
            .ok_or_else(|| Error::not_found("AppInstance", &ai))?;
        let node = app.storage_mut(&si_id)?;
        if node.acl.contains(&initiator.path) {
            return Err(Error::Conflict {
                kind: "AclPolicy".into(),
                name: format!("{}:{}", si.path, initiator.path),
            });
        }
        node.acl.push(initiator.path.clone());
        Ok(())
    }

    async fn access_network_paths(&self) -> Result<Vec<NetworkPath>> {
        self.touch();
        Ok(self.network_paths.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn cluster() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster.add_app_instance("app1", "app1");
        cluster.add_storage_instance("app1", "si1", "iqn.2013-05.com.daterainc:tc:01:sn:1", &["10.0.0.1"]);
        cluster.add_volume("app1", "si1", "vol1", "u1", 10);
        cluster
    }

    #[tokio::test]
    async fn test_tree_navigation() {
        let cluster = cluster();
        let ai = cluster.get_app_instance("app1").await.unwrap();
        let sis = cluster.list_storage_instances(&ai).await.unwrap();
        assert_eq!(sis.len(), 1);
        let vols = cluster.list_volumes(&sis[0]).await.unwrap();
        assert_eq!(vols[0].uuid, "u1");
        assert_eq!(vols[0].path, "/app_instances/app1/storage_instances/si1/volumes/vol1");
        assert_eq!(cluster.call_count(), 3);
    }

    #[tokio::test]
    async fn test_pending_states_then_settle() {
        let cluster = cluster();
        cluster.set_pending_states("app1", "si1", &["unavailable"]);
        let si = cluster.get_storage_instance("app1", "si1").await.unwrap();
        assert!(!si.is_available());
        let si = cluster.get_storage_instance("app1", "si1").await.unwrap();
        assert!(si.is_available());
    }

    #[tokio::test]
    async fn test_acl_conflict() {
        let cluster = cluster();
        let ai = cluster.get_app_instance("app1").await.unwrap();
        let si = cluster.list_storage_instances(&ai).await.unwrap().remove(0);
        let initiator = cluster.create_initiator("host", "iqn.1993-08.org.debian:01:abc").await.unwrap();
        cluster.add_acl_initiator(&si, &initiator).await.unwrap();
        let err = cluster.add_acl_initiator(&si, &initiator).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(cluster.acl("app1", "si1"), vec![initiator.path]);
    }

    #[tokio::test]
    async fn test_snapshot_create_and_clone() {
        let cluster = cluster();
        let snap = cluster
            .create_snapshot("/app_instances/app1/storage_instances/si1/volumes/vol1")
            .await
            .unwrap();
        assert_matches!(
            ResourcePath::parse(&snap.path).unwrap(),
            ResourcePath::VolumeSnapshot { .. }
        );

        let clone = cluster
            .create_app_instance(&NewAppInstance {
                name: "from-snap".into(),
                clone_snapshot_src: crate::domain::CloneSource {
                    path: snap.path.clone(),
                },
            })
            .await
            .unwrap();
        let sis = cluster.list_storage_instances(&clone).await.unwrap();
        assert_eq!(sis[0].name, "si1");
        assert_eq!(cluster.list_volumes(&sis[0]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_resources() {
        let cluster = cluster();
        assert_matches!(cluster.get_app_instance("nope").await, Err(Error::NotFound { .. }));
        assert_matches!(
            cluster.get_volume("app1", "si1", "nope").await,
            Err(Error::NotFound { .. })
        );
        assert_matches!(cluster.get_initiator("iqn.x").await, Err(Error::NotFound { .. }));
    }
}
