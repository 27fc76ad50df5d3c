//! Cluster health check
//!
//! Reachability of the management address, the API itself, and every
//! access network path the cluster advertises.

use crate::domain::ports::{ClusterApiRef, ProcessRunnerRef};
use futures::future::join_all;
use tracing::{debug, warn};

/// Outcome of a health check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// One line per failed probe
    pub failures: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.failures.is_empty()
    }
}

fn ping(ip: &str) -> String {
    format!("ping -c 1 -w 1 {}", ip)
}

/// Probes the cluster from this host
pub struct HealthCheck {
    api: ClusterApiRef,
    runner: ProcessRunnerRef,
}

impl HealthCheck {
    pub fn new(api: ClusterApiRef, runner: ProcessRunnerRef) -> Self {
        Self { api, runner }
    }

    /// Run every probe
    ///
    /// A failing management ping or API call ends the check early; access
    /// paths are all pinged and each failure is reported.
    pub async fn run(&self, mgmt_ip: &str) -> HealthReport {
        let mut report = HealthReport::default();

        if let Err(e) = self.runner.run(&ping(mgmt_ip)).await {
            debug!("Management ping failed: {}", e);
            report.failures.push(format!("Could not ping mgmt_ip: {}", mgmt_ip));
            return report;
        }
        if let Err(e) = self.api.list_app_instances().await {
            report.failures.push(format!("Could not connect to cluster: {}", e));
            return report;
        }

        let paths = match self.api.access_network_paths().await {
            Ok(paths) => paths,
            Err(e) => {
                report.failures.push(format!("Could not read access network paths: {}", e));
                return report;
            }
        };

        let probes = paths.iter().filter_map(|np| {
            let ip = np.ip.as_deref()?;
            let runner = self.runner.clone();
            Some(async move {
                match runner.run(&ping(ip)).await {
                    Ok(_) => None,
                    Err(_) => Some(format!("Could not ping: {} {}", np.name, ip)),
                }
            })
        });
        for failure in join_all(probes).await.into_iter().flatten() {
            warn!("{}", failure);
            report.failures.push(failure);
        }
        report
    }
}
