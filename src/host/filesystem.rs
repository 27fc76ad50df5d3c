//! Filesystems and mounts
//!
//! Formatting is idempotent: when `mkfs` fails because the device already
//! carries a filesystem of the requested type, the format counts as done.

use crate::domain::ports::ProcessRunner;
use crate::error::{Error, Result};
use crate::host::AttachConfig;
use crate::retry::retry;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Mount folder of a volume: `<directory>/<ai>-<si>-<vol>`
pub fn mount_folder(directory: &Path, ai_name: &str, si_name: &str, vol_name: &str) -> PathBuf {
    directory.join(format!("{}-{}-{}", ai_name, si_name, vol_name))
}

/// Filesystem type from `blkid` output (`TYPE="xfs"`)
pub fn parse_blkid_type(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find_map(|field| field.strip_prefix("TYPE="))
        .map(|value| value.trim_matches('"').to_lowercase())
        .filter(|value| !value.is_empty())
}

/// Filesystem currently on a device, if `blkid` recognizes one
pub async fn existing_fstype(runner: &dyn ProcessRunner, config: &AttachConfig, device: &Path) -> Option<String> {
    let output = runner
        .run_fail_ok(&config.sudo(&format!("blkid {}", device.display())))
        .await?;
    parse_blkid_type(&output)
}

/// Create a filesystem on a device, tolerating one of the same type
pub async fn format_device(
    runner: &dyn ProcessRunner,
    config: &AttachConfig,
    device: &Path,
    fstype: &str,
    fsargs: &str,
) -> Result<()> {
    let mkfs = [format!("mkfs.{}", fstype), fsargs.to_string(), device.display().to_string()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let mkfs = config.sudo(&mkfs);
    let wanted = fstype.to_lowercase();

    retry(config.format_retry, "format", || async {
        let err = match runner.run(&mkfs).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        debug!("Checking for existing filesystem on: {}", device.display());
        if existing_fstype(runner, config, device).await.as_deref() == Some(wanted.as_str()) {
            debug!("Found existing {} filesystem, continuing", fstype);
            return Ok(());
        }
        debug!("Failed to format {}. Waiting for device to be ready", device.display());
        Err(backoff::Error::transient(err))
    })
    .await
    .map_err(|e| Error::FormatFailed {
        device: device.display().to_string(),
        fstype: fstype.to_string(),
        reason: e.to_string(),
    })
}

/// Create the mount folder and mount the device on it
pub async fn mount_device(runner: &dyn ProcessRunner, config: &AttachConfig, device: &Path, folder: &Path) -> Result<()> {
    runner
        .run(&config.sudo(&format!("mkdir -p {}", folder.display())))
        .await?;
    runner
        .run(&config.sudo(&format!("mount {} {}", device.display(), folder.display())))
        .await?;
    info!("Volume mount: {}", folder.display());
    Ok(())
}

/// Unmount a folder and remove it; failures are logged, never raised
///
/// Returns whether the folder was unmounted.
pub async fn unmount(runner: &dyn ProcessRunner, config: &AttachConfig, folder: &Path) -> bool {
    if let Err(e) = runner
        .run(&config.sudo(&format!("umount {}", folder.display())))
        .await
    {
        debug!("Not unmounting {}: {}", folder.display(), e);
        return false;
    }
    if runner
        .run_fail_ok(&config.sudo(&format!("rmdir {}", folder.display())))
        .await
        .is_none()
    {
        warn!("Could not remove mount folder {}", folder.display());
    }
    true
}
