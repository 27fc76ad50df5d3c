//! Cluster connection configuration
//!
//! The universal config file (`datera-config.json`, JSON or YAML) is looked
//! up in, in order: an explicit `--config` path, the working directory,
//! `$HOME/`, `$HOME/.` (hidden) and `/etc/datera/`. `DAT_*` environment
//! variables override whatever the file provides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base name of the config file
pub const CONFIG_FILE: &str = "datera-config";
const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];
const SYSTEM_DIR: &str = "/etc/datera";

/// Environment overrides: (variable, field)
pub const ENV_OVERRIDES: [(&str, &str); 5] = [
    ("DAT_MGMT", "mgmt_ip"),
    ("DAT_USER", "username"),
    ("DAT_PASS", "password"),
    ("DAT_TENANT", "tenant"),
    ("DAT_API", "api_version"),
];

/// Connection settings for the cluster management API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub mgmt_ip: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap: Option<String>,
    /// Verify the cluster's TLS certificate
    #[serde(default)]
    pub verify_tls: bool,
}

fn default_tenant() -> String {
    crate::domain::ROOT_TENANT.to_string()
}

fn default_api_version() -> String {
    "2.2".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mgmt_ip: String::new(),
            username: String::new(),
            password: String::new(),
            tenant: default_tenant(),
            api_version: default_api_version(),
            ldap: None,
            verify_tls: false,
        }
    }
}

impl ClusterConfig {
    /// Template written by `--gen-config`
    pub fn template() -> Self {
        Self {
            mgmt_ip: "1.1.1.1".to_string(),
            username: "admin".to_string(),
            password: "password".to_string(),
            ..Default::default()
        }
    }

    /// Parse a config file; `.yaml`/`.yml` files are YAML, anything else JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let config = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Locate, parse, override from the process environment and validate
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let config = match find_config(explicit, home.as_deref()) {
            Some(path) => {
                debug!("Using config file {}", path.display());
                Self::from_file(&path)?
            }
            None if explicit.is_some() => {
                return Err(Error::Configuration(format!(
                    "Config file not found: {}",
                    explicit.map(|p| p.display().to_string()).unwrap_or_default()
                )))
            }
            None => {
                debug!("No config file found, relying on environment");
                Self::default()
            }
        };
        let config = config.with_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `DAT_*` overrides read through `lookup`
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (var, field) in ENV_OVERRIDES {
            let Some(value) = lookup(var).filter(|v| !v.is_empty()) else {
                continue;
            };
            match field {
                "mgmt_ip" => self.mgmt_ip = value,
                "username" => self.username = value,
                "password" => self.password = value,
                "tenant" => self.tenant = value,
                _ => self.api_version = value,
            }
        }
        self
    }

    /// Fail on missing mandatory fields
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("mgmt_ip", &self.mgmt_ip),
            ("username", &self.username),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "Missing required config fields: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Config as printed at startup, with the password masked
    pub fn redacted(&self) -> Self {
        Self {
            password: "*".repeat(self.password.len().min(8)),
            ..self.clone()
        }
    }

    /// Write the template config as JSON
    pub fn write_template(path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(&Self::template())?;
        std::fs::write(path, body + "\n")?;
        Ok(())
    }
}

/// Candidate config locations, highest priority first
pub fn search_paths(explicit: Option<&Path>, home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
        return paths;
    }

    let mut dirs: Vec<(PathBuf, &str)> = vec![(PathBuf::from("."), "")];
    if let Some(home) = home {
        dirs.push((home.to_path_buf(), ""));
        dirs.push((home.to_path_buf(), "."));
    }
    dirs.push((PathBuf::from(SYSTEM_DIR), ""));

    for (dir, prefix) in dirs {
        for ext in EXTENSIONS {
            paths.push(dir.join(format!("{}{}.{}", prefix, CONFIG_FILE, ext)));
        }
    }
    paths
}

/// First existing config file
pub fn find_config(explicit: Option<&Path>, home: Option<&Path>) -> Option<PathBuf> {
    search_paths(explicit, home).into_iter().find(|p| p.is_file())
}
