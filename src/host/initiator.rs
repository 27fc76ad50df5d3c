//! Host initiator registration
//!
//! The host is known to the cluster by its iSCSI initiator name. Before any
//! target can be logged into, that name must be registered as an Initiator
//! in the session's tenant and added to each StorageInstance's ACL.

use crate::domain::ports::{ClusterApi, ProcessRunner};
use crate::domain::resources::{AppInstance, Initiator, ROOT_TENANT};
use crate::error::{Error, Result};
use crate::host::AttachConfig;
use tokio::sync::Mutex;
use tracing::{debug, info};

const INITIATOR_KEY: &str = "InitiatorName=";

/// Extract the initiator name from the contents of the initiator file
pub fn parse_initiator_name(contents: &str) -> Option<String> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix(INITIATOR_KEY))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Read this host's iSCSI initiator name
pub async fn read_initiator_name(runner: &dyn ProcessRunner, config: &AttachConfig) -> Result<String> {
    let file = config.initiator_file.display().to_string();
    let contents = runner.run(&config.sudo(&format!("cat {}", file))).await?;
    parse_initiator_name(&contents).ok_or_else(|| {
        Error::Configuration(format!("No {} line in iSCSI initiator file {}", INITIATOR_KEY, file))
    })
}

/// Process-wide guard around initiator resolution
///
/// Creating an Initiator is not idempotent against concurrent creators, so
/// resolve-or-create runs under one lock and its result is reused for the
/// rest of the process.
#[derive(Default)]
pub struct InitiatorGuard {
    resolved: Mutex<Option<Initiator>>,
}

impl InitiatorGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the host Initiator in the session tenant, creating it when
    /// missing or when the existing record belongs to another tenant
    pub async fn ensure(
        &self,
        api: &dyn ClusterApi,
        runner: &dyn ProcessRunner,
        config: &AttachConfig,
    ) -> Result<Initiator> {
        let mut resolved = self.resolved.lock().await;
        if let Some(initiator) = resolved.as_ref() {
            return Ok(initiator.clone());
        }

        let name = read_initiator_name(runner, config).await?;
        let host = runner.run("hostname").await?.trim().to_string();
        let tenant = api.tenant().unwrap_or(ROOT_TENANT);

        let existing = match api.get_initiator(&name).await {
            Ok(initiator) if initiator.tenant.as_deref() == Some(tenant) => Some(initiator),
            Ok(initiator) => {
                debug!(
                    "Initiator {} belongs to tenant {:?}, not {}",
                    name, initiator.tenant, tenant
                );
                None
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let initiator = match existing {
            Some(initiator) => initiator,
            None => {
                info!("Registering initiator {} for host {}", name, host);
                api.create_initiator(&host, &name).await?
            }
        };
        *resolved = Some(initiator.clone());
        Ok(initiator)
    }
}

/// Register `initiator` in the ACL of every StorageInstance of `ai`
pub async fn setup_acl(api: &dyn ClusterApi, ai: &AppInstance, initiator: &Initiator) -> Result<()> {
    debug!("Setting up ACLs for {} targets", ai.name);
    for si in api.list_storage_instances(ai).await? {
        match api.add_acl_initiator(&si, initiator).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!("ACL already registered for {},{}", ai.name, si.name);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
