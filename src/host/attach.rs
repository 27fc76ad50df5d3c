//! Attachment Manager
//!
//! Drives a cluster AppInstance to usable local block devices and back.
//!
//! ```text
//!   Unregistered ─► AclBound ─► Online ─┬─► per StorageInstance: Polling ─► Available
//!                                       └─► per Volume: LoggedIn ─► Formatted ─► Mounted
//!
//!   teardown:       Mounted ─► Unmounted ─► LoggedOut
//! ```
//!
//! Each AppInstance runs its sequence strictly in order; independent
//! AppInstances are attached concurrently through the task runner.

use crate::controlplane::parallel::{TaskRunner, DEFAULT_WORKERS};
use crate::domain::ports::{ClusterApi, ClusterApiRef, ProcessRunner, ProcessRunnerRef};
use crate::domain::path::ResourcePath;
use crate::domain::resources::{AppInstance, AppInstanceUpdate, StorageInstance, Volume};
use crate::error::{Error, Result};
use crate::host::filesystem::{format_device, mount_device, mount_folder, unmount};
use crate::host::initiator::{setup_acl, InitiatorGuard};
use crate::host::iscsi::{login, logout};
use crate::host::AttachConfig;
use crate::retry::{poll_until, RetryPolicy};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Types
// =============================================================================

/// Step of the attach sequence an AppInstance has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPhase {
    Unregistered,
    AclBound,
    Online,
    Polling,
    Available,
    LoggedIn,
    Formatted,
    Mounted,
}

impl fmt::Display for AttachPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttachPhase::Unregistered => "unregistered",
            AttachPhase::AclBound => "acl-bound",
            AttachPhase::Online => "online",
            AttachPhase::Polling => "polling",
            AttachPhase::Available => "available",
            AttachPhase::LoggedIn => "logged-in",
            AttachPhase::Formatted => "formatted",
            AttachPhase::Mounted => "mounted",
        };
        f.write_str(name)
    }
}

/// How volumes are attached
#[derive(Debug, Clone)]
pub struct AttachOptions {
    /// Log in through every portal and use the multipath device
    pub multipath: bool,
    pub fstype: String,
    /// Extra `mkfs` arguments
    pub fsargs: String,
    /// Parent directory of the mount folders
    pub directory: PathBuf,
    /// Stop after login; no format, no mount
    pub login_only: bool,
    /// AppInstances attached concurrently
    pub workers: usize,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            multipath: true,
            fstype: "xfs".to_string(),
            fsargs: String::new(),
            directory: PathBuf::from("/mnt"),
            login_only: false,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// A volume made available on this host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachedDevice {
    pub app_instance: String,
    pub storage_instance: String,
    pub volume: String,
    pub device_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_folder: Option<PathBuf>,
}

// =============================================================================
// Availability Poll
// =============================================================================

/// Poll a StorageInstance until it reports `available`
pub async fn wait_available(
    api: &dyn ClusterApi,
    policy: RetryPolicy,
    ai_id: &str,
    si_id: &str,
) -> Result<StorageInstance> {
    let subject = ResourcePath::StorageInstance {
        ai: ai_id.to_string(),
        si: si_id.to_string(),
    }
    .to_string();
    poll_until(policy, &subject, || async {
        let si = api.get_storage_instance(ai_id, si_id).await?;
        if si.is_available() {
            Ok(Some(si))
        } else {
            debug!("Waiting for {} to become available, currently {}", si.path, si.op_state);
            Ok(None)
        }
    })
    .await
}

// =============================================================================
// Attachment Manager
// =============================================================================

/// Attaches and detaches AppInstances on the local host
#[derive(Clone)]
pub struct AttachmentManager {
    api: ClusterApiRef,
    runner: ProcessRunnerRef,
    config: Arc<AttachConfig>,
    initiator: Arc<InitiatorGuard>,
}

impl AttachmentManager {
    pub fn new(api: ClusterApiRef, runner: ProcessRunnerRef, config: AttachConfig) -> Self {
        Self {
            api,
            runner,
            config: Arc::new(config),
            initiator: Arc::new(InitiatorGuard::new()),
        }
    }

    /// Host configuration in use
    pub fn config(&self) -> &AttachConfig {
        &self.config
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    /// Attach every volume of every AppInstance
    ///
    /// AppInstances are attached concurrently. All of them run to completion
    /// or failure; the first failure is returned. Devices attached before a
    /// failure stay attached.
    pub async fn mount_volumes(&self, ais: Vec<AppInstance>, options: &AttachOptions) -> Result<Vec<AttachedDevice>> {
        let attached = Arc::new(Mutex::new(Vec::new()));
        let manager = self.clone();
        let shared = attached.clone();
        let opts = Arc::new(options.clone());

        let report = TaskRunner::new(options.workers)
            .run(ais, move |ai| {
                let manager = manager.clone();
                let shared = shared.clone();
                let opts = opts.clone();
                async move {
                    let devices = manager.attach_app_instance(&ai, &opts).await?;
                    shared.lock().extend(devices);
                    Ok(())
                }
            })
            .await;

        let mut devices = std::mem::take(&mut *attached.lock());
        if let Some(first) = report.failures.into_iter().next() {
            if !devices.is_empty() {
                warn!("{} device(s) remain attached after the failure", devices.len());
            }
            return Err(first);
        }
        devices.sort_by(|a, b| a.device_path.cmp(&b.device_path));
        Ok(devices)
    }

    /// Run the full attach sequence for one AppInstance
    pub async fn attach_app_instance(&self, ai: &AppInstance, options: &AttachOptions) -> Result<Vec<AttachedDevice>> {
        self.phase(ai, AttachPhase::Unregistered);
        let initiator = self
            .initiator
            .ensure(self.api.as_ref(), self.runner.as_ref(), &self.config)
            .await?;
        setup_acl(self.api.as_ref(), ai, &initiator).await?;
        self.phase(ai, AttachPhase::AclBound);

        self.api.update_app_instance(ai, &AppInstanceUpdate::online()).await?;
        self.phase(ai, AttachPhase::Online);

        let mut devices = Vec::new();
        for si in self.api.list_storage_instances(ai).await? {
            self.phase(ai, AttachPhase::Polling);
            let si = wait_available(self.api.as_ref(), self.config.online_poll, &ai.id, &si.name).await?;
            self.phase(ai, AttachPhase::Available);

            for (lun, vol) in self.api.list_volumes(&si).await?.into_iter().enumerate() {
                devices.push(self.attach_volume(ai, &si, &vol, lun, options).await?);
            }
        }
        Ok(devices)
    }

    async fn attach_volume(
        &self,
        ai: &AppInstance,
        si: &StorageInstance,
        vol: &Volume,
        lun: usize,
        options: &AttachOptions,
    ) -> Result<AttachedDevice> {
        let iqn = si.access.iqn.as_deref().ok_or_else(|| {
            Error::Consistency(format!("{} is available but exports no iqn", si.path))
        })?;
        let runner = self.runner.as_ref();
        let device = login(runner, &self.config, iqn, &si.access.ips, options.multipath, lun).await?;
        self.phase(ai, AttachPhase::LoggedIn);
        info!("Volume device path: {}", device.display());

        let mut attached = AttachedDevice {
            app_instance: ai.name.clone(),
            storage_instance: si.name.clone(),
            volume: vol.name.clone(),
            device_path: device,
            mount_folder: None,
        };
        if options.login_only {
            return Ok(attached);
        }

        format_device(runner, &self.config, &attached.device_path, &options.fstype, &options.fsargs).await?;
        self.phase(ai, AttachPhase::Formatted);

        let folder = mount_folder(&options.directory, &ai.name, &si.name, &vol.name);
        mount_device(runner, &self.config, &attached.device_path, &folder).await?;
        self.phase(ai, AttachPhase::Mounted);
        attached.mount_folder = Some(folder);
        Ok(attached)
    }

    /// Unmount every volume folder and log out of every target of the
    /// AppInstances
    ///
    /// Nothing here fails: unreachable resources and failing commands are
    /// logged and skipped.
    pub async fn clean_mounts(&self, ais: &[AppInstance], directory: &Path, workers: usize) {
        let mut targets = Vec::new();
        for ai in ais {
            let sis = match self.api.list_storage_instances(ai).await {
                Ok(sis) => sis,
                Err(e) => {
                    warn!("Skipping teardown of {}: {}", ai.name, e);
                    continue;
                }
            };
            for si in sis {
                let Some(iqn) = si.access.iqn.clone() else {
                    debug!("{} has no iqn, nothing to tear down", si.path);
                    continue;
                };
                match self.api.list_volumes(&si).await {
                    Ok(vols) => {
                        for vol in vols {
                            let folder = mount_folder(directory, &ai.name, &si.name, &vol.name);
                            unmount(self.runner.as_ref(), &self.config, &folder).await;
                        }
                    }
                    Err(e) => warn!("Could not list volumes of {}: {}", si.path, e),
                }
                targets.push((iqn, si.access.ips.clone()));
            }
        }

        let runner = self.runner.clone();
        let config = self.config.clone();
        let report = TaskRunner::new(workers)
            .run(targets, move |(iqn, portals)| {
                let runner = runner.clone();
                let config = config.clone();
                async move {
                    logout(runner.as_ref(), &config, &iqn, &portals).await;
                    Ok(())
                }
            })
            .await;
        debug!("Logged out of {} target(s)", report.completed);
    }

    fn phase(&self, ai: &AppInstance, phase: AttachPhase) {
        debug!(app_instance = %ai.name, %phase, "Attach progress");
    }
}
