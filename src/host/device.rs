//! Reverse lookups from local devices
//!
//! Maps a mount point or a block device back to the iSCSI target and LUN it
//! came from, using the mount table and udev's by-path symlinks.

use crate::domain::ports::ProcessRunner;
use crate::error::{Error, Result};
use crate::host::multipath::first_slave;
use crate::host::AttachConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Target and LUN a device belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLun {
    pub iqn: String,
    pub lun: usize,
}

/// Device mounted on `mount`, from the mount table
pub fn device_for_mount(config: &AttachConfig, mount: &Path) -> Result<PathBuf> {
    let table = std::fs::read_to_string(&config.proc_mounts)?;
    let wanted = mount.to_string_lossy();
    let wanted = wanted.trim_end_matches('/');
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?, fields.next()?))
        })
        .find(|(_, point)| *point == wanted)
        .map(|(device, _)| PathBuf::from(device))
        .ok_or_else(|| Error::DeviceNotFound {
            device: format!("no device mounted on {}", mount.display()),
        })
}

/// Parse a by-path link name: `ip-<ip>:<port>-iscsi-<iqn>-lun-<n>`
pub fn parse_by_path_link(link: &str) -> Option<TargetLun> {
    let name = link.rsplit('/').next()?;
    let (_, target) = name.split_once("-iscsi-")?;
    let (iqn, lun) = target.rsplit_once("-lun-")?;
    if !iqn.starts_with("iqn.") {
        return None;
    }
    Some(TargetLun {
        iqn: iqn.to_string(),
        lun: lun.parse().ok()?,
    })
}

/// Pick the by-path link out of `udevadm info --query=symlink` output
pub fn target_from_symlinks(output: &str) -> Option<TargetLun> {
    output
        .split_whitespace()
        .filter(|link| link.contains("by-path"))
        .find_map(parse_by_path_link)
}

/// Target and LUN behind a block device
///
/// A device-mapper node is first mapped to its first backing device.
pub async fn target_for_device(runner: &dyn ProcessRunner, config: &AttachConfig, device: &Path) -> Result<TargetLun> {
    let name = device
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let device = if name.starts_with("dm-") {
        let slave = first_slave(config, &name)?;
        debug!("{} is a multipath device, using slave {}", name, slave);
        config.dev_root.join(slave)
    } else {
        device.to_path_buf()
    };

    let output = runner
        .run(&format!("udevadm info --query=symlink --name={}", device.display()))
        .await?;
    target_from_symlinks(&output).ok_or_else(|| Error::DeviceNotFound {
        device: format!("no iSCSI by-path link for {}", device.display()),
    })
}
