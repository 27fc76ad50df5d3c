//! Host Device Layer
//!
//! Bridges cluster volumes into the local host: initiator registration,
//! iSCSI sessions, multipath resolution, filesystems and mounts, and the
//! reverse teardown.

pub mod attach;
pub mod device;
pub mod filesystem;
pub mod initiator;
pub mod iscsi;
pub mod multipath;
pub mod process;

pub use attach::*;
pub use process::ShellRunner;

use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Host Configuration
// =============================================================================

/// Host paths, tooling and retry budgets used by the attachment flows
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Path to sysfs (for testing)
    pub sysfs_root: PathBuf,
    /// Path to the device tree holding `disk/by-path` and `dm-*` nodes
    pub dev_root: PathBuf,
    /// Mount table
    pub proc_mounts: PathBuf,
    /// iSCSI initiator name file
    pub initiator_file: PathBuf,
    /// iSCSI target port
    pub iscsi_port: u16,
    /// I/O scheduler set on attached devices
    pub io_scheduler: String,
    /// Prefix privileged commands with `sudo`
    pub use_sudo: bool,
    /// StorageInstance availability poll
    pub online_poll: RetryPolicy,
    /// iSCSI discovery + login
    pub login_retry: RetryPolicy,
    /// mkfs
    pub format_retry: RetryPolicy,
    /// Device symlink poll interval (unbounded)
    pub device_poll_interval: Duration,
    /// Wait for multipath to link its devices after login
    pub multipath_settle: Duration,
    /// Wait after logout and multipath flush
    pub logout_settle: Duration,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            proc_mounts: PathBuf::from("/proc/mounts"),
            initiator_file: PathBuf::from("/etc/iscsi/initiatorname.iscsi"),
            iscsi_port: 3260,
            io_scheduler: "noop".to_string(),
            use_sudo: true,
            online_poll: RetryPolicy::new(Duration::from_secs(1), 10),
            login_retry: RetryPolicy::new(Duration::from_secs(2), 9),
            format_retry: RetryPolicy::new(Duration::from_secs(1), 5),
            device_poll_interval: Duration::from_secs(1),
            multipath_settle: Duration::from_secs(2),
            logout_settle: Duration::from_secs(2),
        }
    }
}

impl AttachConfig {
    /// Prefix a privileged command
    pub fn sudo(&self, command: &str) -> String {
        if self.use_sudo {
            format!("sudo {}", command)
        } else {
            command.to_string()
        }
    }

    /// `ip:port` portal string
    pub fn portal(&self, ip: &str) -> String {
        format!("{}:{}", ip, self.iscsi_port)
    }

    /// by-path symlink of a LUN reached through a portal
    pub fn device_link(&self, ip: &str, iqn: &str, lun: usize) -> PathBuf {
        self.dev_root.join("disk/by-path").join(format!(
            "ip-{}-iscsi-{}-lun-{}",
            self.portal(ip),
            iqn,
            lun
        ))
    }

    /// Config rooted in a scratch directory with millisecond timings
    #[cfg(test)]
    pub(crate) fn for_tests(root: &std::path::Path) -> Self {
        let fast = RetryPolicy::new(Duration::from_millis(1), 3);
        Self {
            sysfs_root: root.join("sys"),
            dev_root: root.join("dev"),
            proc_mounts: root.join("proc/mounts"),
            initiator_file: root.join("etc/iscsi/initiatorname.iscsi"),
            online_poll: RetryPolicy::new(Duration::from_millis(1), 10),
            login_retry: RetryPolicy::new(Duration::from_millis(1), 9),
            format_retry: fast,
            device_poll_interval: Duration::from_millis(1),
            multipath_settle: Duration::ZERO,
            logout_settle: Duration::ZERO,
            ..Default::default()
        }
    }
}
