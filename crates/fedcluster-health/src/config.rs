//! Reconciler configuration.
//!
//! Built once at process start (from a TOML file plus CLI overrides) and
//! handed to the reconciler by value; nothing reads it from a global.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HealthError, HealthResult};

/// Namespace holding the credential secrets when none is configured.
pub const DEFAULT_CONTROL_PLANE_NAMESPACE: &str = "kube-federation-system";

/// Tunables for the cluster reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Namespace the credential secrets are looked up in.
    pub control_plane_namespace: String,
    /// Hard upper bound for a single call against a member cluster.
    #[serde(with = "duration_str")]
    pub single_call_timeout: Duration,
    /// Time between two reconciliation passes of one cluster.
    #[serde(with = "duration_str")]
    pub probe_interval: Duration,
    /// How often the registry is rescanned for added or removed clusters.
    #[serde(with = "duration_str")]
    pub resync_interval: Duration,
    /// Consecutive failed probes before a Ready cluster goes Offline.
    pub failure_threshold: u32,
    /// Consecutive successful probes before an Offline cluster goes Ready.
    pub success_threshold: u32,
    /// Clusters this instance is responsible for. Empty means all.
    pub clusters: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            control_plane_namespace: DEFAULT_CONTROL_PLANE_NAMESPACE.to_string(),
            single_call_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(10),
            resync_interval: Duration::from_secs(30),
            failure_threshold: 1,
            success_threshold: 1,
            clusters: Vec::new(),
        }
    }
}

impl ReconcilerConfig {
    /// Reject values that would make the reconciler spin or never flip.
    pub fn validate(&self) -> HealthResult<()> {
        if self.control_plane_namespace.is_empty() {
            return Err(HealthError::InvalidConfig(
                "control_plane_namespace must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("single_call_timeout", self.single_call_timeout),
            ("probe_interval", self.probe_interval),
            ("resync_interval", self.resync_interval),
        ] {
            if value.is_zero() {
                return Err(HealthError::InvalidConfig(format!("{field} must be > 0")));
            }
        }
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(HealthError::InvalidConfig(
                "failure_threshold and success_threshold must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this instance reconciles the named cluster.
    pub fn in_scope(&self, cluster: &str) -> bool {
        self.clusters.is_empty() || self.clusters.iter().any(|c| c == cluster)
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration the way [`parse_duration`] reads it back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
    }
}
