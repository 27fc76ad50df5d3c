//! iSCSI sessions
//!
//! Login, I/O scheduler tuning and logout, driven through `iscsiadm`.

use crate::domain::ports::ProcessRunner;
use crate::error::{Error, Result};
use crate::host::multipath::{link_target_name, resolve_multipath_device};
use crate::host::AttachConfig;
use crate::retry::{poll_forever, retry};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Portals used for a target: all of them with multipath, the first one
/// otherwise
pub fn select_portals(portals: &[String], multipath: bool) -> &[String] {
    if multipath {
        portals
    } else {
        &portals[..portals.len().min(1)]
    }
}

/// Discover and log into a target through one portal
///
/// An existing session (exit status 15) counts as success; other failures
/// are retried under the login policy.
pub async fn login_portal(
    runner: &dyn ProcessRunner,
    config: &AttachConfig,
    iqn: &str,
    ip: &str,
) -> Result<()> {
    let portal = config.portal(ip);
    let discovery = config.sudo(&format!("iscsiadm -m discovery -t st -p {}", portal));
    let login = config.sudo(&format!("iscsiadm -m node -T {} -p {} --login", iqn, portal));

    let attempt = || async {
        debug!("Trying to log into target: {}", portal);
        let outcome = match runner.run(&discovery).await {
            Ok(_) => runner.run(&login).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_session_exists() => {
                debug!("Session to {} via {} already exists", iqn, portal);
                Ok(())
            }
            Err(e) if e.is_retryable() => Err(backoff::Error::transient(e)),
            Err(e) => Err(backoff::Error::permanent(e)),
        }
    };

    retry(config.login_retry, "iSCSI login", attempt)
        .await
        .map_err(|e| Error::LoginFailed {
            iqn: iqn.to_string(),
            portal: portal.clone(),
            reason: e.to_string(),
        })
}

/// Wait for a device symlink to resolve and return the device name
pub async fn wait_for_device(config: &AttachConfig, link: &Path) -> Result<String> {
    let subject = link.display().to_string();
    poll_forever(config.device_poll_interval, &subject, || async {
        match link_target_name(link) {
            Ok(device) => Ok(Some(device)),
            Err(_) => {
                debug!("Waiting for device to be ready: {}", subject);
                Ok(None)
            }
        }
    })
    .await
}

/// Set the I/O scheduler of a block device
pub async fn set_scheduler(runner: &dyn ProcessRunner, config: &AttachConfig, device: &str) -> Result<()> {
    let scheduler = config.sysfs_root.join("block").join(device).join("queue/scheduler");
    debug!("Setting {} scheduler for device: {}", config.io_scheduler, device);
    runner
        .run(&format!(
            "echo '{}' | {}",
            config.io_scheduler,
            config.sudo(&format!("tee {}", scheduler.display()))
        ))
        .await?;
    Ok(())
}

/// Log into LUN `lun` of a target and return the device path to use
///
/// Only LUN 0 performs the login; further LUNs ride the same session.
pub async fn login(
    runner: &dyn ProcessRunner,
    config: &AttachConfig,
    iqn: &str,
    portals: &[String],
    multipath: bool,
    lun: usize,
) -> Result<PathBuf> {
    let portals = select_portals(portals, multipath);
    let Some(first) = portals.first() else {
        return Err(Error::LoginFailed {
            iqn: iqn.to_string(),
            portal: String::new(),
            reason: "target exports no portals".to_string(),
        });
    };

    if lun == 0 {
        for ip in portals {
            login_portal(runner, config, iqn, ip).await?;
        }
        info!("Logged into {} via {} portal(s)", iqn, portals.len());
    }

    for ip in portals {
        let device = wait_for_device(config, &config.device_link(ip, iqn, lun)).await?;
        set_scheduler(runner, config, &device).await?;
    }

    let link = config.device_link(first, iqn, lun);
    if !multipath {
        return Ok(link);
    }
    debug!("Sleeping to allow for multipath devices to finish linking");
    tokio::time::sleep(config.multipath_settle).await;
    resolve_multipath_device(config, &link)
}

/// Tear down every session and record of a target; never fails
pub async fn logout(runner: &dyn ProcessRunner, config: &AttachConfig, iqn: &str, portals: &[String]) {
    for ip in portals {
        let portal = config.portal(ip);
        runner
            .run_fail_ok(&config.sudo(&format!("iscsiadm -m node -T {} -p {} --logout", iqn, portal)))
            .await;
        runner
            .run_fail_ok(&config.sudo(&format!("iscsiadm -m node -T {} -p {} --op delete", iqn, portal)))
            .await;
        runner
            .run_fail_ok(&config.sudo(&format!("iscsiadm -m discoverydb -p {} --op delete", portal)))
            .await;
    }
    runner
        .run_fail_ok(&config.sudo("iscsiadm -m session --rescan"))
        .await;
    runner.run_fail_ok(&config.sudo("multipath -F")).await;
    debug!("Sleeping to wait for logout");
    tokio::time::sleep(config.logout_settle).await;
    debug!("Logout complete for {}", iqn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ISCSI_ERR_SESS_EXISTS;
    use crate::testing::ScriptedRunner;
    use assert_matches::assert_matches;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    const IQN: &str = "iqn.2013-05.com.daterainc:tc:01:sn:abc";

    fn host() -> (TempDir, AttachConfig) {
        let root = TempDir::new().unwrap();
        let config = AttachConfig::for_tests(root.path());
        std::fs::create_dir_all(config.dev_root.join("disk/by-path")).unwrap();
        (root, config)
    }

    fn link_device(config: &AttachConfig, ip: &str, lun: usize, device: &str) {
        symlink(format!("../../{}", device), config.device_link(ip, IQN, lun)).unwrap();
    }

    #[test]
    fn test_select_portals() {
        let portals = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        assert_eq!(select_portals(&portals, true).len(), 2);
        assert_eq!(select_portals(&portals, false), &portals[..1]);
        assert!(select_portals(&[], false).is_empty());
    }

    #[tokio::test]
    async fn test_session_exists_is_success_without_retry() {
        let (_root, config) = host();
        let runner = ScriptedRunner::new();
        runner.fail("--login", ISCSI_ERR_SESS_EXISTS);

        login_portal(runner.as_ref(), &config, IQN, "10.0.0.1").await.unwrap();
        assert_eq!(runner.count("--login"), 1);
        assert_eq!(runner.count("discovery"), 1);
    }

    #[tokio::test]
    async fn test_login_retries_then_succeeds() {
        let (_root, config) = host();
        let runner = ScriptedRunner::new();
        runner.fail_times("--login", 8, 2);

        login_portal(runner.as_ref(), &config, IQN, "10.0.0.1").await.unwrap();
        assert_eq!(runner.count("--login"), 3);
        assert_eq!(
            runner.calls()[0],
            "sudo iscsiadm -m discovery -t st -p 10.0.0.1:3260"
        );
    }

    #[tokio::test]
    async fn test_login_gives_up_after_budget() {
        let (_root, config) = host();
        let runner = ScriptedRunner::new();
        runner.fail("discovery", 4);

        let err = login_portal(runner.as_ref(), &config, IQN, "10.0.0.1").await.unwrap_err();
        assert_matches!(err, Error::LoginFailed { ref portal, .. } if portal == "10.0.0.1:3260");
        assert_eq!(runner.count("discovery"), 10);
        assert_eq!(runner.count("--login"), 0);
    }

    #[tokio::test]
    async fn test_login_lun0_sets_scheduler() {
        let (_root, config) = host();
        link_device(&config, "10.0.0.1", 0, "sdb");
        let runner = ScriptedRunner::new();
        let portals = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];

        let path = login(runner.as_ref(), &config, IQN, &portals, false, 0).await.unwrap();
        assert_eq!(path, config.device_link("10.0.0.1", IQN, 0));
        assert_eq!(runner.count("--login"), 1);
        assert_eq!(runner.count("10.0.0.2"), 0);
        let tee = runner.calls().into_iter().find(|c| c.contains("tee")).unwrap();
        assert!(tee.starts_with("echo 'noop' | sudo tee "));
        assert!(tee.ends_with("sys/block/sdb/queue/scheduler"));
    }

    #[tokio::test]
    async fn test_login_later_lun_skips_session_setup() {
        let (_root, config) = host();
        link_device(&config, "10.0.0.1", 1, "sdc");
        let runner = ScriptedRunner::new();

        login(runner.as_ref(), &config, IQN, &["10.0.0.1".to_string()], false, 1)
            .await
            .unwrap();
        assert_eq!(runner.count("iscsiadm"), 0);
        assert_eq!(runner.count("tee"), 1);
    }

    #[tokio::test]
    async fn test_login_multipath_resolves_dm() {
        let (_root, config) = host();
        std::fs::create_dir_all(config.sysfs_root.join("block/dm-2/slaves/sdb")).unwrap();
        link_device(&config, "10.0.0.1", 0, "sdb");
        link_device(&config, "10.0.0.2", 0, "sdc");
        let runner = ScriptedRunner::new();
        let portals = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];

        let path = login(runner.as_ref(), &config, IQN, &portals, true, 0).await.unwrap();
        assert_eq!(path, config.dev_root.join("dm-2"));
        assert_eq!(runner.count("--login"), 2);
        assert_eq!(runner.count("tee"), 2);
    }

    #[tokio::test]
    async fn test_logout_tolerates_failures() {
        let (_root, config) = host();
        let runner = ScriptedRunner::new();
        runner.fail("iscsiadm", 21).fail("multipath", 1);

        logout(runner.as_ref(), &config, IQN, &["10.0.0.1".to_string(), "10.0.0.2".to_string()]).await;
        let calls = runner.calls();
        assert_eq!(calls.len(), 8);
        assert_eq!(calls[0], format!("sudo iscsiadm -m node -T {} -p 10.0.0.1:3260 --logout", IQN));
        assert_eq!(calls[2], "sudo iscsiadm -m discoverydb -p 10.0.0.1:3260 --op delete");
        assert_eq!(calls[6], "sudo iscsiadm -m session --rescan");
        assert_eq!(calls[7], "sudo multipath -F");
    }
}
