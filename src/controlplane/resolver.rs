//! Resource Resolver
//!
//! Resolves a name or id into a cluster resource by fanning out over every
//! AppInstance in the tenant.
//!
//! ```text
//!   list_app_instances() ──► FIFO queue ──► N detached workers
//!                                               │ inspect(ai)
//!                                               ▼
//!                        first claim wins ──► found cell ──► waiter
//! ```
//!
//! The waiter returns as soon as the found cell is filled or every queued
//! AppInstance has been inspected. When several workers match concurrently
//! whichever claims the cell first wins; the other matches are dropped.

use crate::domain::ports::ClusterApiRef;
use crate::domain::resources::{AppInstance, Snapshot, StorageInstance, Volume};
use crate::error::{Error, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for the fan-out search
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Lower bound on the number of workers spawned per search
    pub min_workers: usize,
    /// Longest the waiter sleeps between completion checks
    pub tick: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_workers: 20,
            tick: Duration::from_millis(200),
        }
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Exact-identifier search criterion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Name(String),
    Id(String),
}

impl Lookup {
    /// Build a lookup from optional name and id; exactly one must be set
    pub fn from_args(name: Option<&str>, id: Option<&str>) -> Result<Self> {
        match (name, id) {
            (Some(name), None) => Ok(Lookup::Name(name.to_string())),
            (None, Some(id)) => Ok(Lookup::Id(id.to_string())),
            _ => Err(Error::InvalidArgument(
                "Either --name or --id MUST be provided".to_string(),
            )),
        }
    }

    /// The searched value
    pub fn value(&self) -> &str {
        match self {
            Lookup::Name(v) | Lookup::Id(v) => v,
        }
    }

    /// Whether a resource with this id and name matches
    pub fn matches(&self, id: &str, name: &str) -> bool {
        match self {
            Lookup::Name(v) => v == name,
            Lookup::Id(v) => v == id,
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Name(v) => write!(f, "name={}", v),
            Lookup::Id(v) => write!(f, "id={}", v),
        }
    }
}

// =============================================================================
// Search State
// =============================================================================

struct SearchState<T> {
    queue: Mutex<VecDeque<AppInstance>>,
    /// AppInstances not yet fully inspected
    pending: AtomicUsize,
    found: OnceLock<T>,
    errors: Mutex<Vec<Error>>,
    notify: Notify,
}

impl<T> SearchState<T> {
    fn new(ais: Vec<AppInstance>) -> Self {
        Self {
            pending: AtomicUsize::new(ais.len()),
            queue: Mutex::new(ais.into()),
            found: OnceLock::new(),
            errors: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.found.get().is_some() || self.pending.load(Ordering::SeqCst) == 0
    }
}

/// Marks a dequeued AppInstance as inspected once its outcome is recorded
struct Inspected<'a, T>(&'a SearchState<T>);

impl<T> Drop for Inspected<'_, T> {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
        self.0.notify.notify_one();
    }
}

async fn search_worker<T, F, Fut>(state: Arc<SearchState<T>>, api: ClusterApiRef, inspect: Arc<F>)
where
    F: Fn(ClusterApiRef, AppInstance) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    while state.found.get().is_none() {
        let next = state.queue.lock().pop_front();
        let Some(ai) = next else {
            break;
        };
        let _inspected = Inspected(&state);
        let path = ai.path.clone();
        let outcome = AssertUnwindSafe(inspect(api.clone(), ai))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::TaskFailed(format!("inspection of {} panicked", path))));
        match outcome {
            Ok(Some(hit)) => {
                let _ = state.found.set(hit);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Inspection failed: {}", e);
                state.errors.lock().push(e);
            }
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Fan-out resolver over the cluster's AppInstances
#[derive(Clone)]
pub struct Resolver {
    api: ClusterApiRef,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a resolver with default tuning
    pub fn new(api: ClusterApiRef) -> Self {
        Self::with_config(api, ResolverConfig::default())
    }

    /// Create a resolver with explicit tuning
    pub fn with_config(api: ClusterApiRef, config: ResolverConfig) -> Self {
        Self { api, config }
    }

    /// Cluster API this resolver searches
    pub fn api(&self) -> &ClusterApiRef {
        &self.api
    }

    /// Find an AppInstance by name or id
    pub async fn find_app_instance(&self, lookup: &Lookup) -> Result<AppInstance> {
        debug!("Finding AppInstance {}", lookup);
        self.api
            .list_app_instances()
            .await?
            .into_iter()
            .find(|ai| lookup.matches(&ai.id, &ai.name))
            .ok_or_else(|| Error::not_found("AppInstance", lookup.value()))
    }

    /// Find a Volume by name or uuid
    pub async fn find_volume(&self, lookup: &Lookup) -> Result<Volume> {
        debug!("Finding Volume {}", lookup);
        let criterion = lookup.clone();
        self.search("Volume", lookup.value(), move |api, ai| {
            let criterion = criterion.clone();
            async move {
                for si in api.list_storage_instances(&ai).await? {
                    if let Some(vol) = api
                        .list_volumes(&si)
                        .await?
                        .into_iter()
                        .find(|vol| criterion.matches(&vol.uuid, &vol.name))
                    {
                        return Ok(Some(vol));
                    }
                }
                Ok(None)
            }
        })
        .await
    }

    /// Find the StorageInstance exporting `iqn`
    pub async fn find_storage_instance_by_iqn(&self, iqn: &str) -> Result<StorageInstance> {
        debug!("Finding StorageInstance with iqn {}", iqn);
        let target = iqn.to_string();
        self.search("StorageInstance", iqn, move |api, ai| {
            let target = target.clone();
            async move {
                Ok(api
                    .list_storage_instances(&ai)
                    .await?
                    .into_iter()
                    .find(|si| si.access.iqn.as_deref() == Some(target.as_str())))
            }
        })
        .await
    }

    /// Find a snapshot by timestamp or uuid
    ///
    /// AppInstance-level snapshots are checked first; a match there skips
    /// the AppInstance's volumes entirely.
    pub async fn find_snapshot(&self, ts_or_uuid: &str) -> Result<Snapshot> {
        if ts_or_uuid.is_empty() {
            return Err(Error::InvalidArgument(
                "A snapshot timestamp or uuid MUST be provided".to_string(),
            ));
        }
        debug!("Finding Snapshot {}", ts_or_uuid);
        let target = ts_or_uuid.to_string();
        self.search("Snapshot", ts_or_uuid, move |api, ai| {
            let target = target.clone();
            async move {
                if let Some(snap) = api
                    .list_snapshots(&ai.path)
                    .await?
                    .into_iter()
                    .find(|snap| snap.matches(&target))
                {
                    return Ok(Some(snap));
                }
                for si in api.list_storage_instances(&ai).await? {
                    for vol in api.list_volumes(&si).await? {
                        if let Some(snap) = api
                            .list_snapshots(&vol.path)
                            .await?
                            .into_iter()
                            .find(|snap| snap.matches(&target))
                        {
                            return Ok(Some(snap));
                        }
                    }
                }
                Ok(None)
            }
        })
        .await
    }

    /// Fan `inspect` out over every AppInstance and return the first hit
    async fn search<T, F, Fut>(&self, kind: &str, what: &str, inspect: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(ClusterApiRef, AppInstance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let ais = self.api.list_app_instances().await?;
        let workers = ais.len().max(self.config.min_workers);
        let state = Arc::new(SearchState::new(ais));
        let inspect = Arc::new(inspect);

        debug!("Searching {} for {} with {} workers", kind, what, workers);
        for _ in 0..workers {
            tokio::spawn(search_worker(state.clone(), self.api.clone(), inspect.clone()));
        }

        while !state.is_done() {
            let _ = tokio::time::timeout(self.config.tick, state.notify.notified()).await;
        }

        if let Some(hit) = state.found.get() {
            return Ok(hit.clone());
        }
        let mut errors = state.errors.lock();
        if !errors.is_empty() {
            return Err(errors.swap_remove(0));
        }
        Err(Error::not_found(kind, what))
    }
}
