//! Error types for the health subsystem.

use thiserror::Error;

/// Result type alias for health operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// Faults raised inside a cluster's reconciliation pipeline.
///
/// None of these escape a worker: credential faults become an `Offline`
/// condition, metadata faults are logged and retried on the next pass.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("secret {namespace}/{name} not found")]
    CredentialNotFound { namespace: String, name: String },

    #[error("secret {namespace}/{name} is malformed: {detail}")]
    CredentialMalformed {
        namespace: String,
        name: String,
        detail: String,
    },

    #[error("metadata query failed: {0}")]
    MetadataQueryFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("state store error: {0}")]
    State(#[from] fedcluster_state::StateError),
}

impl HealthError {
    /// Whether this is a credential resolution fault.
    pub fn is_credential(&self) -> bool {
        matches!(
            self,
            Self::CredentialNotFound { .. } | Self::CredentialMalformed { .. }
        )
    }
}
