//! Resource mutations
//!
//! Size, placement and repair-priority changes on a resolved resource. Each
//! one is valid for a single resource kind only.

use crate::domain::ports::ClusterApi;
use crate::domain::resources::{
    AppInstance, AppInstanceUpdate, PlacementMode, RepairPriority, Resource, Volume, VolumeUpdate,
};
use crate::error::{Error, Result};
use tracing::info;

fn wrong_kind(operation: &str, resource: &Resource) -> Error {
    Error::WrongResourceKind {
        operation: operation.to_string(),
        kind: resource.kind().to_string(),
        path: resource.path().to_string(),
    }
}

fn volume<'a>(operation: &str, resource: &'a Resource) -> Result<&'a Volume> {
    match resource {
        Resource::Volume(vol) => Ok(vol),
        other => Err(wrong_kind(operation, other)),
    }
}

fn app_instance<'a>(operation: &str, resource: &'a Resource) -> Result<&'a AppInstance> {
    match resource {
        Resource::AppInstance(ai) => Ok(ai),
        other => Err(wrong_kind(operation, other)),
    }
}

/// Grow a Volume to `size` GiB; shrinking or keeping the size is rejected
pub async fn extend_volume(api: &dyn ClusterApi, resource: &Resource, size: u64) -> Result<Volume> {
    let vol = volume("extend", resource)?;
    if size <= vol.size {
        return Err(Error::SizeNotIncreased {
            path: vol.path.clone(),
            current: vol.size,
            requested: size,
        });
    }
    let update = VolumeUpdate {
        size: Some(size),
        ..Default::default()
    };
    let updated = api.update_volume(vol, &update).await?;
    info!("Extended {} from {}GiB to {}GiB", vol.path, vol.size, updated.size);
    Ok(updated)
}

/// Change the placement mode of a Volume
pub async fn set_placement_mode(api: &dyn ClusterApi, resource: &Resource, mode: PlacementMode) -> Result<Volume> {
    let vol = volume("placement-mode", resource)?;
    let update = VolumeUpdate {
        placement_mode: Some(mode),
        ..Default::default()
    };
    let updated = api.update_volume(vol, &update).await?;
    info!("Set placement mode of {} to {}", vol.path, mode);
    Ok(updated)
}

/// Change the repair priority of an AppInstance
pub async fn set_repair_priority(
    api: &dyn ClusterApi,
    resource: &Resource,
    priority: RepairPriority,
) -> Result<AppInstance> {
    let ai = app_instance("repair-priority", resource)?;
    let update = AppInstanceUpdate {
        repair_priority: Some(priority),
        ..Default::default()
    };
    let updated = api.update_app_instance(ai, &update).await?;
    info!("Set repair priority of {} to {}", ai.path, priority);
    Ok(updated)
}
