//! fedcluster-health: reachability and metadata for federation member clusters.
//!
//! Keeps a `Ready` condition on every registered cluster current by probing
//! its API endpoint, and records the cluster's zones and region while it is
//! reachable.
//!
//! # Architecture
//!
//! ```text
//! ClusterReconciler
//!   ├── sync_registrations(): one worker per in-scope registration
//!   └── ClusterWorker (per cluster, own interval)
//!       ├── CredentialResolver → bearer token
//!       ├── EndpointProbe (timeout-bounded GET /version) → ProbeOutcome
//!       ├── ConditionStateMachine → Ready condition
//!       ├── MetadataSync (only while Ready) → zones, region
//!       └── StateStore::update_cluster_status (one transaction)
//! ```
//!
//! Faults never cross clusters: whatever goes wrong inside a pass is
//! published through that cluster's condition.

pub mod client;
pub mod condition;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metadata;
pub mod probe;
pub mod reconciler;

#[cfg(test)]
mod testing;

pub use client::{BoxFuture, CallError, ClusterClient, HttpClusterClient, NodeLabels, ProbeTarget};
pub use condition::{ClusterHealth, ConditionStateMachine, Observation, Transition, reason};
pub use config::{ReconcilerConfig, parse_duration};
pub use credentials::{CredentialResolver, CredentialStore};
pub use error::{HealthError, HealthResult};
pub use metadata::{ClusterMetadata, MetadataSync, derive_metadata};
pub use probe::{EndpointProbe, ProbeOutcome};
pub use reconciler::{ClusterReconciler, ClusterWorker, PassResult, SyncReport};
