//! Credential resolution.
//!
//! Turns a registration's `secretRef.name` into a bearer token by reading
//! the secret from the control-plane namespace. There are no retries: a
//! missing or malformed secret is a configuration fault and is reported
//! on the next condition update.

use std::sync::Arc;

use tracing::debug;

use fedcluster_state::{ClusterSecret, StateStore, TOKEN_KEY};

use crate::error::{HealthError, HealthResult};

/// Lookup interface over wherever secrets are kept.
pub trait CredentialStore: Send + Sync {
    /// Fetch a secret, `None` if it does not exist.
    fn lookup(&self, namespace: &str, name: &str) -> HealthResult<Option<ClusterSecret>>;
}

impl CredentialStore for StateStore {
    fn lookup(&self, namespace: &str, name: &str) -> HealthResult<Option<ClusterSecret>> {
        Ok(self.get_secret(namespace, name)?)
    }
}

/// Resolves secret references within a fixed namespace.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    namespace: String,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Namespace the resolver reads secrets from.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resolve `secret_name` to a non-empty bearer token.
    pub fn resolve(&self, secret_name: &str) -> HealthResult<String> {
        let secret = self
            .store
            .lookup(&self.namespace, secret_name)?
            .ok_or_else(|| HealthError::CredentialNotFound {
                namespace: self.namespace.clone(),
                name: secret_name.to_string(),
            })?;

        let token = secret
            .data
            .get(TOKEN_KEY)
            .ok_or_else(|| self.malformed(secret_name, format!("missing {TOKEN_KEY:?} key")))?
            .trim();
        if token.is_empty() {
            return Err(self.malformed(secret_name, format!("{TOKEN_KEY:?} is empty")));
        }

        debug!(namespace = %self.namespace, secret = %secret_name, "credentials resolved");
        Ok(token.to_string())
    }

    fn malformed(&self, name: &str, detail: String) -> HealthError {
        HealthError::CredentialMalformed {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            detail,
        }
    }
}
