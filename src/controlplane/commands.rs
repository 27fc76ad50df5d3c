//! Command Orchestrator
//!
//! Maps an operation and its flags onto the resolver, the snapshot service,
//! the mutations and the attachment manager, and renders what they return.
//!
//! A command runs in three stages:
//!
//! 1. the operation itself, which may produce a *found* resource
//! 2. mutations requested by flags, applied to the found resource
//! 3. attachment actions (`--mount`, `--login`, `--clean`, `--remount`)
//!
//! Every argument check happens before the first cluster call.

use crate::controlplane::health::HealthCheck;
use crate::controlplane::mutation::{extend_volume, set_placement_mode, set_repair_priority};
use crate::controlplane::resolver::{Lookup, Resolver};
use crate::controlplane::snapshots::SnapshotService;
use crate::domain::ports::{ClusterApiRef, ProcessRunnerRef};
use crate::domain::resources::{
    AppInstance, PlacementMode, RepairPriority, Resource, Snapshot, Volume,
};
use crate::error::{Error, Result};
use crate::host::device::{device_for_mount, target_for_device};
use crate::host::{AttachConfig, AttachOptions, AttachedDevice, AttachmentManager};
use clap::ValueEnum;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// =============================================================================
// Operations and Options
// =============================================================================

/// Top-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Ping the cluster and its access paths
    HealthCheck,
    /// List snapshots of the tenant, an AppInstance or matching volumes
    ListSnaps,
    /// list-snaps with resource names resolved
    ListSnapsPretty,
    /// Find a Volume by name or uuid
    FindVol,
    /// Find an AppInstance by name or id
    FindApp,
    /// Find a Snapshot by timestamp or uuid
    FindSnap,
    /// Find the Volume mounted at --path
    FindFromMount,
    /// Find the Volume behind the block device at --path
    FindFromDevicePath,
    /// Snapshot an AppInstance or Volume
    MakeSnap,
    /// Roll back to a snapshot
    Rollback,
}

/// Rendering of found resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Flags of one invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub name: Option<String>,
    pub id: Option<String>,
    pub path: Option<PathBuf>,
    /// Snapshot the found resource
    pub make_snap: bool,
    /// Roll the found resource back; `Some(None)` picks the snapshot itself
    /// or the most recent one
    pub rollback: Option<Option<String>>,
    /// New Volume size in GiB
    pub extend: Option<u64>,
    pub placement_mode: Option<String>,
    pub repair_priority: Option<String>,
    pub mount: bool,
    pub login: bool,
    pub clean: bool,
    pub remount: bool,
    /// With --mount/--login, clone and attach every snapshot of the found
    /// AppInstance
    pub all_snaps: bool,
    pub attach: AttachOptions,
    pub output: OutputFormat,
}

impl CommandOptions {
    fn wants_attach(&self) -> bool {
        self.mount || self.login
    }

    fn attach_options(&self) -> AttachOptions {
        AttachOptions {
            login_only: self.login && !self.mount,
            ..self.attach.clone()
        }
    }

    fn snapshot_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .or(self.name.as_deref())
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "One of --name, --id of the snapshot MUST be provided".to_string(),
                )
            })
    }

    fn require_path(&self, op: &str) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument(format!("{} requires --path argument", op)))
    }
}

/// Flags parsed into typed values
struct Mutations {
    placement_mode: Option<PlacementMode>,
    repair_priority: Option<RepairPriority>,
}

impl Mutations {
    fn parse(op: Operation, options: &CommandOptions) -> Result<Self> {
        if options.make_snap && matches!(op, Operation::MakeSnap | Operation::FindSnap) {
            return Err(Error::InvalidArgument(format!(
                "--make-snap cannot be combined with {}",
                op.to_possible_value().map(|v| v.get_name().to_string()).unwrap_or_default()
            )));
        }
        Ok(Self {
            placement_mode: options.placement_mode.as_deref().map(str::parse).transpose()?,
            repair_priority: options.repair_priority.as_deref().map(str::parse).transpose()?,
        })
    }
}

/// Result of a command: text for stdout and whether it succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub stdout: String,
    pub success: bool,
}

impl Outcome {
    fn ok(stdout: String) -> Self {
        Self {
            stdout,
            success: true,
        }
    }

    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        if self.success {
            crate::SUCCESS
        } else {
            crate::FAILURE
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs operations against one cluster from this host
pub struct Commands {
    api: ClusterApiRef,
    resolver: Resolver,
    snapshots: SnapshotService,
    attach: AttachmentManager,
    health: HealthCheck,
    mgmt_ip: String,
}

impl Commands {
    pub fn new(api: ClusterApiRef, runner: ProcessRunnerRef, host: AttachConfig, mgmt_ip: impl Into<String>) -> Self {
        let resolver = Resolver::new(api.clone());
        let snapshots = SnapshotService::new(resolver.clone()).with_online_poll(host.online_poll);
        Self {
            attach: AttachmentManager::new(api.clone(), runner.clone(), host),
            health: HealthCheck::new(api.clone(), runner),
            api,
            resolver,
            snapshots,
            mgmt_ip: mgmt_ip.into(),
        }
    }

    /// Run one operation with its flags
    pub async fn run(&self, op: Operation, options: &CommandOptions) -> Result<Outcome> {
        let mutations = Mutations::parse(op, options)?;
        debug!("Running {:?}", op);

        let mut out = String::new();
        let found: Resource = match op {
            Operation::HealthCheck => return Ok(self.health_check().await),
            Operation::ListSnaps => {
                let set = self
                    .snapshots
                    .find_snapshots(options.name.as_deref(), options.id.as_deref())
                    .await?;
                return Ok(Outcome::ok(set.render()));
            }
            Operation::ListSnapsPretty => {
                let set = self
                    .snapshots
                    .find_snapshots(options.name.as_deref(), options.id.as_deref())
                    .await?;
                return Ok(Outcome::ok(self.snapshots.render_pretty(&set).await?));
            }
            Operation::Rollback => {
                let id = options.snapshot_id()?;
                let snap = self.resolver.find_snapshot(id).await?;
                let devices = self.rollback_to(&snap, options).await?;
                let _ = writeln!(out, "Restored: {}", snap.path);
                out.push_str(&render_devices(&devices, options.output)?);
                return Ok(Outcome::ok(out));
            }
            Operation::MakeSnap => {
                let lookup = Lookup::from_args(options.name.as_deref(), options.id.as_deref())?;
                let snap = self.snapshots.make_snapshot(&lookup).await?;
                let _ = writeln!(out, "Created snapshot: {}", snap.path);
                snap.into()
            }
            Operation::FindVol => {
                let lookup = Lookup::from_args(options.name.as_deref(), options.id.as_deref())?;
                self.resolver.find_volume(&lookup).await?.into()
            }
            Operation::FindApp => {
                let lookup = Lookup::from_args(options.name.as_deref(), options.id.as_deref())?;
                self.resolver.find_app_instance(&lookup).await?.into()
            }
            Operation::FindSnap => {
                let id = options.snapshot_id()?;
                self.resolver.find_snapshot(id).await?.into()
            }
            Operation::FindFromMount => {
                let mount = options.require_path("find-from-mount")?;
                let device = device_for_mount(self.attach.config(), mount)?;
                self.find_from_device(&device).await?.into()
            }
            Operation::FindFromDevicePath => {
                let device = options.require_path("find-from-device-path")?;
                self.find_from_device(device).await?.into()
            }
        };

        out.push_str(&render_found(&found, options.output)?);
        self.apply_mutations(&found, options, &mutations, &mut out).await?;
        self.apply_attach(&found, options, &mut out).await?;
        Ok(Outcome::ok(out))
    }

    async fn health_check(&self) -> Outcome {
        let report = self.health.run(&self.mgmt_ip).await;
        if report.is_healthy() {
            return Outcome::ok("Health Check Completed Successfully\n".to_string());
        }
        Outcome {
            stdout: report.failures.join("\n") + "\n",
            success: false,
        }
    }

    /// Volume behind a local block device
    pub async fn find_from_device(&self, device: &Path) -> Result<Volume> {
        let target = target_for_device(self.attach.runner(), self.attach.config(), device).await?;
        debug!("{} is LUN {} of {}", device.display(), target.lun, target.iqn);
        let si = self.resolver.find_storage_instance_by_iqn(&target.iqn).await?;
        self.api
            .list_volumes(&si)
            .await?
            .into_iter()
            .nth(target.lun)
            .ok_or_else(|| Error::not_found("Volume", format!("{} lun {}", si.path, target.lun)))
    }

    async fn rollback_to(&self, snap: &Snapshot, options: &CommandOptions) -> Result<Vec<AttachedDevice>> {
        if options.wants_attach() {
            let attach = options.attach_options();
            self.snapshots.rollback(snap, Some((&self.attach, &attach))).await
        } else {
            self.snapshots.rollback(snap, None).await
        }
    }

    async fn apply_mutations(
        &self,
        found: &Resource,
        options: &CommandOptions,
        mutations: &Mutations,
        out: &mut String,
    ) -> Result<()> {
        let api = self.api.as_ref();
        if let Some(size) = options.extend {
            let vol = extend_volume(api, found, size).await?;
            let _ = writeln!(out, "Extended {} to {}GiB", vol.path, vol.size);
        }
        if let Some(mode) = mutations.placement_mode {
            let vol = set_placement_mode(api, found, mode).await?;
            let _ = writeln!(out, "Placement mode of {} set to {}", vol.path, mode);
        }
        if let Some(priority) = mutations.repair_priority {
            let ai = set_repair_priority(api, found, priority).await?;
            let _ = writeln!(out, "Repair priority of {} set to {}", ai.path, priority);
        }
        if options.make_snap {
            let snap = match found {
                Resource::AppInstance(_) | Resource::Volume(_) => self.api.create_snapshot(found.path()).await?,
                other => {
                    return Err(Error::WrongResourceKind {
                        operation: "make-snap".to_string(),
                        kind: other.kind().to_string(),
                        path: other.path().to_string(),
                    })
                }
            };
            let _ = writeln!(out, "Created snapshot: {}", snap.path);
        }
        if let Some(requested) = &options.rollback {
            let snap = self.rollback_target(found, requested.as_deref()).await?;
            let devices = self.rollback_to(&snap, options).await?;
            let _ = writeln!(out, "Restored: {}", snap.path);
            out.push_str(&render_devices(&devices, options.output)?);
        }
        Ok(())
    }

    /// Snapshot a `--rollback` flag refers to
    async fn rollback_target(&self, found: &Resource, requested: Option<&str>) -> Result<Snapshot> {
        if let Some(id) = requested {
            return self.resolver.find_snapshot(id).await;
        }
        match found {
            Resource::Snapshot(snap) => Ok(snap.clone()),
            Resource::AppInstance(_) | Resource::Volume(_) => self.snapshots.latest_snapshot(found.path()).await,
            other => Err(Error::WrongResourceKind {
                operation: "rollback".to_string(),
                kind: other.kind().to_string(),
                path: other.path().to_string(),
            }),
        }
    }

    async fn apply_attach(&self, found: &Resource, options: &CommandOptions, out: &mut String) -> Result<()> {
        // A rollback with --mount already re-attached
        if options.rollback.is_some() {
            return Ok(());
        }
        let directory = &options.attach.directory;

        if options.wants_attach() {
            let ais = self.attach_targets(found, options.all_snaps).await?;
            let devices = self.attach.mount_volumes(ais, &options.attach_options()).await?;
            out.push_str(&render_devices(&devices, options.output)?);
        } else if options.remount {
            let ai = self.owning_app_instance(found).await?;
            self.attach.clean_mounts(std::slice::from_ref(&ai), directory, 1).await;
            let devices = self.attach.mount_volumes(vec![ai], &options.attach).await?;
            out.push_str(&render_devices(&devices, options.output)?);
        } else if options.clean {
            let ai = self.owning_app_instance(found).await?;
            self.attach.clean_mounts(std::slice::from_ref(&ai), directory, 1).await;
            let _ = writeln!(out, "Cleaned mounts of {}", ai.name);
        }
        Ok(())
    }

    /// AppInstances to attach for a found resource
    ///
    /// A snapshot is attached through a fresh clone of it.
    async fn attach_targets(&self, found: &Resource, all_snaps: bool) -> Result<Vec<AppInstance>> {
        if let Resource::Snapshot(snap) = found {
            return Ok(vec![self.snapshots.clone_from_snapshot(snap).await?]);
        }
        let ai = self.owning_app_instance(found).await?;
        if !all_snaps {
            return Ok(vec![ai]);
        }
        let set = self.snapshots.find_snapshots(None, Some(&ai.id)).await?;
        info!("Cloning {} snapshot(s) of {}", set.len(), ai.name);
        let mut clones = Vec::with_capacity(set.len());
        for snap in set.iter() {
            clones.push(self.snapshots.clone_from_snapshot(snap).await?);
        }
        Ok(clones)
    }

    async fn owning_app_instance(&self, found: &Resource) -> Result<AppInstance> {
        match found {
            Resource::AppInstance(ai) => Ok(ai.clone()),
            other => self.api.get_app_instance(&other.app_instance_id()?).await,
        }
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Json => serde_json::to_string_pretty(value)? + "\n",
    })
}

/// Header and body for a found resource
pub fn render_found(found: &Resource, format: OutputFormat) -> Result<String> {
    Ok(format!(
        "Found {}: {}\n=============\n{}",
        found.kind(),
        found.name(),
        render(found, format)?
    ))
}

fn render_devices(devices: &[AttachedDevice], format: OutputFormat) -> Result<String> {
    if devices.is_empty() {
        return Ok(String::new());
    }
    render(&devices, format)
}
