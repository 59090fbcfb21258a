//! Endpoint probe.
//!
//! One probe is one authenticated discovery call, hard-bounded by the
//! configured single-call timeout. The probe never touches local state;
//! the outcome is handed to the condition state machine.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::client::{CallError, ClusterClient, ProbeTarget};

/// Result of a single reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint answered the discovery call with 2xx.
    Success,
    /// Network, connect, or protocol failure.
    Unreachable(String),
    /// No answer within the single-call timeout.
    Timeout(Duration),
    /// The endpoint rejected the bearer token.
    Unauthorized(String),
    /// The endpoint's certificate failed trust validation.
    CertificateError(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the outcome means "cannot talk to the cluster at all".
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

impl From<CallError> for ProbeOutcome {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Unauthorized(_) => Self::Unauthorized(err.to_string()),
            CallError::Certificate(_) => Self::CertificateError(err.to_string()),
            CallError::Endpoint(_)
            | CallError::Connect(_)
            | CallError::Status(_)
            | CallError::Protocol(_) => Self::Unreachable(err.to_string()),
        }
    }
}

/// Time-bounded reachability check.
#[derive(Clone)]
pub struct EndpointProbe {
    client: Arc<dyn ClusterClient>,
    timeout: Duration,
}

impl EndpointProbe {
    pub fn new(client: Arc<dyn ClusterClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// The single-call timeout applied to every probe.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `target`. Always returns within the timeout plus scheduling
    /// overhead, whatever the client does.
    pub async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        match tokio::time::timeout(self.timeout, self.client.discover(target)).await {
            Ok(Ok(())) => ProbeOutcome::Success,
            Ok(Err(e)) => {
                debug!(endpoint = %target.endpoint, error = %e, "probe failed");
                e.into()
            }
            Err(_) => {
                debug!(endpoint = %target.endpoint, timeout = ?self.timeout, "probe timed out");
                ProbeOutcome::Timeout(self.timeout)
            }
        }
    }
}
