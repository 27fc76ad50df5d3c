//! Resource Path Parser
//!
//! Cluster resources are addressed by slash-delimited paths:
//!
//! ```text
//! /app_instances/{ai}
//! /app_instances/{ai}/snapshots/{ts}
//! /app_instances/{ai}/storage_instances/{si}
//! /app_instances/{ai}/storage_instances/{si}/volumes/{vol}
//! /app_instances/{ai}/storage_instances/{si}/volumes/{vol}/snapshots/{ts}
//! ```
//!
//! Matching is strict: fixed collection names, case-sensitive, no empty or
//! extra segments. Anything else is a [`Error::MalformedPath`].

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

const APP_INSTANCES: &str = "app_instances";
const STORAGE_INSTANCES: &str = "storage_instances";
const VOLUMES: &str = "volumes";
const SNAPSHOTS: &str = "snapshots";

/// A parsed cluster resource path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourcePath {
    AppInstance {
        ai: String,
    },
    AppSnapshot {
        ai: String,
        ts: String,
    },
    StorageInstance {
        ai: String,
        si: String,
    },
    Volume {
        ai: String,
        si: String,
        vol: String,
    },
    VolumeSnapshot {
        ai: String,
        si: String,
        vol: String,
        ts: String,
    },
}

impl ResourcePath {
    /// Parse a path, trying the snapshot shapes first
    pub fn parse(path: &str) -> Result<Self> {
        if let Some(parsed) = match_volume_snapshot(path) {
            return Ok(parsed);
        }
        if let Some(parsed) = match_app_snapshot(path) {
            return Ok(parsed);
        }

        let segments = segments(path).ok_or_else(|| Error::MalformedPath(path.to_string()))?;
        match segments.as_slice() {
            [APP_INSTANCES, ai] => Ok(ResourcePath::AppInstance { ai: ai.to_string() }),
            [APP_INSTANCES, ai, STORAGE_INSTANCES, si] => Ok(ResourcePath::StorageInstance {
                ai: ai.to_string(),
                si: si.to_string(),
            }),
            [APP_INSTANCES, ai, STORAGE_INSTANCES, si, VOLUMES, vol] => Ok(ResourcePath::Volume {
                ai: ai.to_string(),
                si: si.to_string(),
                vol: vol.to_string(),
            }),
            _ => Err(Error::MalformedPath(path.to_string())),
        }
    }

    /// Parse a path that must name a snapshot
    pub fn parse_snapshot(path: &str) -> Result<Self> {
        match_volume_snapshot(path)
            .or_else(|| match_app_snapshot(path))
            .ok_or_else(|| Error::MalformedPath(path.to_string()))
    }

    /// Id of the owning AppInstance
    pub fn app_instance(&self) -> &str {
        match self {
            ResourcePath::AppInstance { ai }
            | ResourcePath::AppSnapshot { ai, .. }
            | ResourcePath::StorageInstance { ai, .. }
            | ResourcePath::Volume { ai, .. }
            | ResourcePath::VolumeSnapshot { ai, .. } => ai,
        }
    }

    /// Snapshot timestamp, for snapshot paths
    pub fn timestamp(&self) -> Option<&str> {
        match self {
            ResourcePath::AppSnapshot { ts, .. } | ResourcePath::VolumeSnapshot { ts, .. } => {
                Some(ts)
            }
            _ => None,
        }
    }

    /// Whether this path names a snapshot
    pub fn is_snapshot(&self) -> bool {
        self.timestamp().is_some()
    }
}

impl FromStr for ResourcePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePath::AppInstance { ai } => write!(f, "/{}/{}", APP_INSTANCES, ai),
            ResourcePath::AppSnapshot { ai, ts } => {
                write!(f, "/{}/{}/{}/{}", APP_INSTANCES, ai, SNAPSHOTS, ts)
            }
            ResourcePath::StorageInstance { ai, si } => {
                write!(f, "/{}/{}/{}/{}", APP_INSTANCES, ai, STORAGE_INSTANCES, si)
            }
            ResourcePath::Volume { ai, si, vol } => write!(
                f,
                "/{}/{}/{}/{}/{}/{}",
                APP_INSTANCES, ai, STORAGE_INSTANCES, si, VOLUMES, vol
            ),
            ResourcePath::VolumeSnapshot { ai, si, vol, ts } => write!(
                f,
                "/{}/{}/{}/{}/{}/{}/{}/{}",
                APP_INSTANCES, ai, STORAGE_INSTANCES, si, VOLUMES, vol, SNAPSHOTS, ts
            ),
        }
    }
}

/// Match `/app_instances/{ai}/storage_instances/{si}/volumes/{vol}/snapshots/{ts}`
pub fn match_volume_snapshot(path: &str) -> Option<ResourcePath> {
    match segments(path)?.as_slice() {
        [APP_INSTANCES, ai, STORAGE_INSTANCES, si, VOLUMES, vol, SNAPSHOTS, ts] => {
            Some(ResourcePath::VolumeSnapshot {
                ai: ai.to_string(),
                si: si.to_string(),
                vol: vol.to_string(),
                ts: ts.to_string(),
            })
        }
        _ => None,
    }
}

/// Match `/app_instances/{ai}/snapshots/{ts}`
pub fn match_app_snapshot(path: &str) -> Option<ResourcePath> {
    match segments(path)?.as_slice() {
        [APP_INSTANCES, ai, SNAPSHOTS, ts] => Some(ResourcePath::AppSnapshot {
            ai: ai.to_string(),
            ts: ts.to_string(),
        }),
        _ => None,
    }
}

/// Split an absolute path into non-empty segments
fn segments(path: &str) -> Option<Vec<&str>> {
    let rest = path.strip_prefix('/')?;
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}
