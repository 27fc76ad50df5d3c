//! Shell Process Runner
//!
//! Runs host tooling (iscsiadm, multipath, mkfs, mount, udevadm) through
//! `sh -c`, capturing stdout and turning non-zero exits into
//! [`Error::Command`].

use crate::domain::ports::ProcessRunner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Process runner backed by `sh -c`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    /// Create a runner using `/bin/sh`
    pub fn new() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<String> {
        debug!("Running cmd: {}", command);

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| Error::Command {
                command: command.to_string(),
                status: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::Command {
                command: command.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
