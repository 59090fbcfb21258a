//! Domain types for the cluster registry.
//!
//! Field names on the wire follow the federation registration schema
//! (`apiEndpoint`, `caBundle`, `secretRef.name`, `status.conditions[]`, ...).
//! Condition timestamps are unix epoch milliseconds; `created_at` is seconds.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Unique identifier for a member cluster.
pub type ClusterName = String;

/// Secret key holding the bearer token.
pub const TOKEN_KEY: &str = "token";

// ── Registration ──────────────────────────────────────────────────

/// A member cluster known to the federation control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRegistration {
    pub name: ClusterName,
    /// Operator-owned connection details.
    pub spec: ClusterSpec,
    /// Reconciler-owned observed state.
    #[serde(default)]
    pub status: ClusterStatus,
    /// Unix timestamp (seconds) when the cluster was registered.
    #[serde(default)]
    pub created_at: u64,
}

/// Connection details for a member cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Hostname, hostname:port, IP or IP:port, optionally prefixed with
    /// `https://` or `http://`.
    pub api_endpoint: String,
    /// PEM trust anchors for the endpoint. `None` means default trust.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub ca_bundle: Option<Vec<u8>>,
    /// Secret in the control-plane namespace holding the bearer token.
    pub secret_ref: SecretRef,
}

/// Reference to a secret in the control-plane namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretRef {
    pub name: String,
}

/// Observed state of a member cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterStatus {
    /// At most one entry per condition type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,
    /// Availability zones of the cluster's nodes, sorted and distinct.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    /// Region of the cluster's nodes; empty when unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
}

/// A typed, timestamped health signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    /// Last time the condition was evaluated (epoch ms).
    #[serde(default)]
    pub last_probe_time: u64,
    /// Last time `status` changed value.
    #[serde(default)]
    pub last_transition_time: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Condition type. Types other than `Ready` are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionType {
    Ready,
    Other(String),
}

impl From<String> for ConditionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Ready" => Self::Ready,
            _ => Self::Other(s),
        }
    }
}

impl From<ConditionType> for String {
    fn from(t: ConditionType) -> Self {
        match t {
            ConditionType::Ready => "Ready".to_string(),
            ConditionType::Other(s) => s,
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

// ── Credentials ───────────────────────────────────────────────────

/// A namespaced secret. The bearer token is stored under [`TOKEN_KEY`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSecret {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

// ── Impls ─────────────────────────────────────────────────────────

impl ClusterRegistration {
    /// Check the operator-owned fields before the record is stored.
    pub fn validate(&self) -> StateResult<()> {
        if self.name.is_empty() || self.name.len() > 253 {
            return Err(StateError::Invalid(format!(
                "cluster name must be 1-253 characters, got {:?}",
                self.name
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(StateError::Invalid(format!(
                "cluster name {:?} may only contain lowercase alphanumerics, '-' and '.'",
                self.name
            )));
        }
        if self.spec.api_endpoint.trim().is_empty() {
            return Err(StateError::Invalid("apiEndpoint is required".to_string()));
        }
        if self.spec.secret_ref.name.trim().is_empty() {
            return Err(StateError::Invalid("secretRef.name is required".to_string()));
        }
        Ok(())
    }
}

impl ClusterStatus {
    /// Look up a condition by type.
    pub fn condition(&self, type_: &ConditionType) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| &c.type_ == type_)
    }

    /// Status of the `Ready` condition, `Unknown` if never probed.
    pub fn ready_status(&self) -> ConditionStatus {
        self.condition(&ConditionType::Ready)
            .map(|c| c.status)
            .unwrap_or_default()
    }
}

impl ClusterSecret {
    /// Build the composite key for the secrets table.
    pub fn table_key(&self) -> String {
        secret_key(&self.namespace, &self.name)
    }
}

/// Composite key for a secret.
pub fn secret_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// `caBundle` travels base64 encoded, like any other byte field in the
/// registration schema.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
