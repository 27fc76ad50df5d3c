//! Multipath device resolution
//!
//! After login the by-path symlink points either straight at a device-mapper
//! node (`dm-N`) or at one of the SCSI paths multipath assembled into a
//! `dm-N`. In the latter case the owning map is found by scanning
//! `/sys/block/dm-*/slaves/*` for the path device.

use crate::error::{Error, Result};
use crate::host::AttachConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the block device a symlink resolves to
pub fn link_target_name(link: &Path) -> Result<String> {
    let target = std::fs::read_link(link).map_err(|_| Error::DeviceNotFound {
        device: link.display().to_string(),
    })?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::DeviceNotFound {
            device: link.display().to_string(),
        })
}

/// Resolve the multipath device for a by-path symlink
pub fn resolve_multipath_device(config: &AttachConfig, link: &Path) -> Result<PathBuf> {
    let device = link_target_name(link)?;
    if device.starts_with("dm-") {
        return Ok(link.to_path_buf());
    }

    let pattern = config.sysfs_root.join("block/dm-*/slaves/*");
    let entries = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| Error::Internal(format!("bad glob pattern {}: {}", pattern.display(), e)))?;

    for slave in entries.flatten() {
        if slave.file_name().map(|n| n.to_string_lossy() == device.as_str()) != Some(true) {
            continue;
        }
        // <sysfs>/block/dm-N/slaves/<device>
        let Some(dm) = slave.parent().and_then(Path::parent).and_then(Path::file_name) else {
            continue;
        };
        debug!("Found matching device: {} under dm-* device {}", device, dm.to_string_lossy());
        return Ok(config.dev_root.join(dm));
    }

    Err(Error::Consistency(format!(
        "Couldn't find dm-* path for path: {}, found non dm-* device: {}",
        link.display(),
        device
    )))
}

/// First backing device of a device-mapper node
pub fn first_slave(config: &AttachConfig, dm: &str) -> Result<String> {
    let dir = config.sysfs_root.join("block").join(dm).join("slaves");
    let mut slaves: Vec<String> = std::fs::read_dir(&dir)?
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    slaves.sort();
    slaves
        .into_iter()
        .next()
        .ok_or_else(|| Error::Consistency(format!("{} has no slave devices", dm)))
}
