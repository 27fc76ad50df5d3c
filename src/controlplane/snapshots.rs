//! Snapshot operations
//!
//! Listing, creation, rollback and cloning of AppInstance- and Volume-level
//! snapshots.

use crate::controlplane::parallel::TaskRunner;
use crate::controlplane::resolver::{Lookup, Resolver};
use crate::domain::path::ResourcePath;
use crate::domain::ports::{ClusterApi, ClusterApiRef};
use crate::domain::resources::{
    AppInstance, AppInstanceUpdate, CloneSource, NewAppInstance, Snapshot, VolumeUpdate,
};
use crate::error::{Error, Result};
use crate::host::{wait_available, AttachOptions, AttachedDevice, AttachmentManager};
use crate::retry::RetryPolicy;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Snapshot Set
// =============================================================================

/// Snapshots split by owner kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSet {
    pub app: Vec<Snapshot>,
    pub volume: Vec<Snapshot>,
}

impl SnapshotSet {
    pub fn len(&self) -> usize {
        self.app.len() + self.volume.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every snapshot, AppInstance-level first
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.app.iter().chain(self.volume.iter())
    }

    fn sort(&mut self) {
        self.app.sort_by(|a, b| a.path.cmp(&b.path));
        self.volume.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// `<path> <op_state>` listing
    pub fn render(&self) -> String {
        let app: Vec<String> = self.app.iter().map(|s| format!("{} {}", s.path, s.op_state)).collect();
        let vol: Vec<String> = self.volume.iter().map(|s| format!("{} {}", s.path, s.op_state)).collect();
        render_sections(&app, &vol)
    }
}

/// Two titled sections, one entry per line
pub fn render_sections(app: &[String], vol: &[String]) -> String {
    let mut out = String::from("App Snaps\n=========\n");
    for line in app {
        let _ = writeln!(out, "{}", line);
    }
    out.push_str("\nVol Snaps\n=========\n");
    for line in vol {
        let _ = writeln!(out, "{}", line);
    }
    out
}

/// Most recent snapshot by timestamp
pub fn latest(snapshots: &[Snapshot]) -> Option<&Snapshot> {
    snapshots.iter().max_by(|a, b| match (a.timestamp(), b.timestamp()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.utc_ts.cmp(&b.utc_ts),
    })
}

/// Name of an AppInstance cloned from a snapshot
pub fn clone_name(snap: &Snapshot) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("from-snap-{}-{}", snap.utc_ts, &suffix[..8])
}

// =============================================================================
// Snapshot Service
// =============================================================================

/// Snapshot operations against the cluster
#[derive(Clone)]
pub struct SnapshotService {
    resolver: Resolver,
    workers: usize,
    /// StorageInstance availability poll after a volume restore
    online_poll: RetryPolicy,
}

impl SnapshotService {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            workers: crate::controlplane::parallel::DEFAULT_WORKERS,
            online_poll: RetryPolicy::new(Duration::from_secs(1), 10),
        }
    }

    pub fn with_online_poll(mut self, policy: RetryPolicy) -> Self {
        self.online_poll = policy;
        self
    }

    fn api(&self) -> &ClusterApiRef {
        self.resolver.api()
    }

    /// Collect snapshots
    ///
    /// Without a name or id, every snapshot in the tenant. With one, the
    /// value is first tried as an AppInstance id; otherwise it selects
    /// volumes by uuid or name across the tenant.
    pub async fn find_snapshots(&self, name: Option<&str>, id: Option<&str>) -> Result<SnapshotSet> {
        if name.is_some() && id.is_some() {
            return Err(Error::InvalidArgument(
                "Only one of --name or --id can be provided".to_string(),
            ));
        }

        let mut volume_filter = None;
        if let Some(value) = name.or(id) {
            match self.api().get_app_instance(value).await {
                Ok(ai) => {
                    let mut set = collect_snapshots(self.api().as_ref(), &ai, None).await?;
                    set.sort();
                    return Ok(set);
                }
                Err(e) if e.is_not_found() => {
                    debug!("{} is not an AppInstance id, matching volumes", value);
                    volume_filter = Some(value.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        let ais = self.api().list_app_instances().await?;
        let collected = Arc::new(Mutex::new(SnapshotSet::default()));
        let shared = collected.clone();
        let api = self.api().clone();
        let filter = Arc::new(volume_filter);

        TaskRunner::new(ais.len().max(self.workers))
            .run(ais, move |ai| {
                let api = api.clone();
                let shared = shared.clone();
                let filter = filter.clone();
                async move {
                    let found = collect_snapshots(api.as_ref(), &ai, filter.as_deref()).await?;
                    let mut set = shared.lock();
                    set.app.extend(found.app);
                    set.volume.extend(found.volume);
                    Ok(())
                }
            })
            .await
            .into_result()?;

        let mut set = std::mem::take(&mut *collected.lock());
        set.sort();
        Ok(set)
    }

    /// Snapshot an AppInstance, or a Volume when no AppInstance matches
    pub async fn make_snapshot(&self, lookup: &Lookup) -> Result<Snapshot> {
        let parent = match self.resolver.find_app_instance(lookup).await {
            Ok(ai) => ai.path,
            Err(e) if e.is_not_found() => self.resolver.find_volume(lookup).await?.path,
            Err(e) => return Err(e),
        };
        let snap = self.api().create_snapshot(&parent).await?;
        info!("Created snapshot: {}", snap.path);
        Ok(snap)
    }

    /// Most recent snapshot of an AppInstance or Volume
    pub async fn latest_snapshot(&self, parent_path: &str) -> Result<Snapshot> {
        let snapshots = self.api().list_snapshots(parent_path).await?;
        latest(&snapshots)
            .cloned()
            .ok_or_else(|| Error::not_found("Snapshot", format!("{}/snapshots", parent_path)))
    }

    /// Restore the owner of `snap` to it
    ///
    /// With `remount`, the owning AppInstance's mounts are torn down first
    /// and re-attached afterwards.
    pub async fn rollback(
        &self,
        snap: &Snapshot,
        remount: Option<(&AttachmentManager, &AttachOptions)>,
    ) -> Result<Vec<AttachedDevice>> {
        let target = ResourcePath::parse_snapshot(&snap.path)?;
        let api = self.api();
        let ai = api.get_app_instance(target.app_instance()).await?;
        info!("Restoring: {}", snap.path);

        if let Some((attach, options)) = remount {
            attach.clean_mounts(std::slice::from_ref(&ai), &options.directory, 1).await;
        }

        api.update_app_instance(&ai, &AppInstanceUpdate::force_offline()).await?;
        match &target {
            ResourcePath::VolumeSnapshot { ai: ai_id, si, vol, ts } => {
                let volume = api.get_volume(ai_id, si, vol).await?;
                let update = VolumeUpdate {
                    restore_point: Some(ts.clone()),
                    ..Default::default()
                };
                api.update_volume(&volume, &update).await?;
                api.update_app_instance(&ai, &AppInstanceUpdate::online()).await?;
                wait_available(api.as_ref(), self.online_poll, ai_id, si).await?;
            }
            ResourcePath::AppSnapshot { ts, .. } => {
                api.update_app_instance(&ai, &AppInstanceUpdate::restore_point(ts.as_str()))
                    .await?;
                api.update_app_instance(&ai, &AppInstanceUpdate::online()).await?;
            }
            _ => return Err(Error::MalformedPath(snap.path.clone())),
        }

        match remount {
            Some((attach, options)) => attach.mount_volumes(vec![ai], options).await,
            None => Ok(Vec::new()),
        }
    }

    /// Create a new AppInstance cloned from a snapshot
    pub async fn clone_from_snapshot(&self, snap: &Snapshot) -> Result<AppInstance> {
        info!("Creating new AppInstance: {}", snap.path);
        let request = NewAppInstance {
            name: clone_name(snap),
            clone_snapshot_src: CloneSource {
                path: snap.path.clone(),
            },
        };
        self.api().create_app_instance(&request).await
    }

    /// Listing with resource names resolved, sorted
    ///
    /// Volume snapshots render as `ai -- si -- vol -- ts`, AppInstance
    /// snapshots as `ai -- ts`.
    pub async fn render_pretty(&self, set: &SnapshotSet) -> Result<String> {
        let lines = Arc::new(Mutex::new((Vec::new(), Vec::new())));
        let shared = lines.clone();
        let api = self.api().clone();
        let snaps: Vec<Snapshot> = set.iter().cloned().collect();

        TaskRunner::new(snaps.len().max(self.workers))
            .run(snaps, move |snap| {
                let api = api.clone();
                let shared = shared.clone();
                async move {
                    match ResourcePath::parse_snapshot(&snap.path)? {
                        ResourcePath::VolumeSnapshot { ai, si, vol, ts } => {
                            let ai_name = api.get_app_instance(&ai).await?.name;
                            let si_name = api.get_storage_instance(&ai, &si).await?.name;
                            let vol_name = api.get_volume(&ai, &si, &vol).await?.name;
                            let line = format!("{} -- {} -- {} -- {}", ai_name, si_name, vol_name, ts);
                            shared.lock().1.push(line);
                        }
                        ResourcePath::AppSnapshot { ai, ts } => {
                            let ai_name = api.get_app_instance(&ai).await?.name;
                            shared.lock().0.push(format!("{} -- {}", ai_name, ts));
                        }
                        _ => return Err(Error::MalformedPath(snap.path.clone())),
                    }
                    Ok(())
                }
            })
            .await
            .into_result()?;

        let (mut app, mut vol) = std::mem::take(&mut *lines.lock());
        app.sort();
        vol.sort();
        Ok(render_sections(&app, &vol))
    }
}

/// Snapshots of one AppInstance; with `volume`, only those of volumes
/// matching it by uuid or name
async fn collect_snapshots(api: &dyn ClusterApi, ai: &AppInstance, volume: Option<&str>) -> Result<SnapshotSet> {
    let mut set = SnapshotSet::default();
    if volume.is_none() {
        set.app = api.list_snapshots(&ai.path).await?;
    }
    for si in api.list_storage_instances(ai).await? {
        for vol in api.list_volumes(&si).await? {
            let wanted = volume.map_or(true, |v| vol.uuid == v || vol.name == v);
            if wanted {
                set.volume.extend(api.list_snapshots(&vol.path).await?);
            }
        }
    }
    Ok(set)
}
