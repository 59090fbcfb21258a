//! fedclusterd.toml configuration.
//!
//! Every field has a default, so an empty (or absent) file is valid:
//!
//! ```toml
//! data_dir = "/var/lib/fedcluster"
//!
//! [controller]
//! control_plane_namespace = "kube-federation-system"
//! single_call_timeout = "10s"
//! probe_interval = "10s"
//! clusters = ["east", "west"]
//!
//! [api]
//! port = 8443
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use fedcluster_health::ReconcilerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the registry database.
    pub data_dir: PathBuf,
    pub controller: ReconcilerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/fedcluster"),
            controller: ReconcilerConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8443 }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the registry database inside `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("fedcluster.redb")
    }
}
