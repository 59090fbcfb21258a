//! Zone and region inventory.
//!
//! Only run for clusters that just probed ready. Failures are soft: the
//! caller keeps the previously recorded zones and region and tries again
//! on the next pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::client::{ClusterClient, NodeLabels, ProbeTarget};
use crate::error::{HealthError, HealthResult};

pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const REGION_LABEL: &str = "topology.kubernetes.io/region";
pub const LEGACY_ZONE_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";
pub const LEGACY_REGION_LABEL: &str = "failure-domain.beta.kubernetes.io/region";

/// Topology reported by a member cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    /// Sorted, distinct.
    pub zones: Vec<String>,
    pub region: Option<String>,
}

/// Reads zone/region labels off a cluster's nodes.
#[derive(Clone)]
pub struct MetadataSync {
    client: Arc<dyn ClusterClient>,
    timeout: Duration,
}

impl MetadataSync {
    pub fn new(client: Arc<dyn ClusterClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Query the cluster's nodes and derive its metadata.
    pub async fn refresh(&self, target: &ProbeTarget) -> HealthResult<ClusterMetadata> {
        let nodes = tokio::time::timeout(self.timeout, self.client.list_nodes(target))
            .await
            .map_err(|_| {
                HealthError::MetadataQueryFailed(format!(
                    "node listing timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| HealthError::MetadataQueryFailed(e.to_string()))?;

        let metadata = derive_metadata(&nodes);
        debug!(
            endpoint = %target.endpoint,
            nodes = nodes.len(),
            zones = ?metadata.zones,
            region = ?metadata.region,
            "metadata refreshed"
        );
        Ok(metadata)
    }
}

fn label<'a>(labels: &'a NodeLabels, key: &str, legacy: &str) -> Option<&'a str> {
    labels
        .get(key)
        .or_else(|| labels.get(legacy))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Zones are the distinct zone labels across nodes. Region is the most
/// common region label; ties go to the lexicographically smallest.
pub fn derive_metadata(nodes: &[NodeLabels]) -> ClusterMetadata {
    let mut zones = BTreeSet::new();
    let mut regions: BTreeMap<&str, usize> = BTreeMap::new();

    for labels in nodes {
        if let Some(zone) = label(labels, ZONE_LABEL, LEGACY_ZONE_LABEL) {
            zones.insert(zone.to_string());
        }
        if let Some(region) = label(labels, REGION_LABEL, LEGACY_REGION_LABEL) {
            *regions.entry(region).or_default() += 1;
        }
    }

    // BTreeMap iterates in key order, so keeping the first maximum breaks
    // ties lexicographically.
    let mut region: Option<(&str, usize)> = None;
    for (name, count) in regions {
        if region.is_none_or(|(_, best)| count > best) {
            region = Some((name, count));
        }
    }

    ClusterMetadata {
        zones: zones.into_iter().collect(),
        region: region.map(|(name, _)| name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CallError;
    use crate::testing::{ScriptedClient, node};

    fn target() -> ProbeTarget {
        ProbeTarget {
            endpoint: "east".to_string(),
            ca_bundle: None,
            token: "t".to_string(),
        }
    }

    #[test]
    fn zones_sorted_and_distinct() {
        let nodes = vec![
            node("us-east-1b", "us-east-1"),
            node("us-east-1a", "us-east-1"),
            node("us-east-1b", "us-east-1"),
        ];
        let meta = derive_metadata(&nodes);
        assert_eq!(meta.zones, vec!["us-east-1a", "us-east-1b"]);
        assert_eq!(meta.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn region_majority_wins() {
        let nodes = vec![node("a", "west"), node("b", "east"), node("c", "east")];
        assert_eq!(derive_metadata(&nodes).region.as_deref(), Some("east"));
    }

    #[test]
    fn region_tie_goes_to_smallest_name() {
        let nodes = vec![node("a", "west"), node("b", "east")];
        assert_eq!(derive_metadata(&nodes).region.as_deref(), Some("east"));
    }

    #[test]
    fn legacy_labels_are_a_fallback() {
        let mut legacy = NodeLabels::new();
        legacy.insert(LEGACY_ZONE_LABEL.to_string(), "z1".to_string());
        legacy.insert(LEGACY_REGION_LABEL.to_string(), "r1".to_string());
        let mut both = node("z2", "r2");
        both.insert(LEGACY_ZONE_LABEL.to_string(), "ignored".to_string());

        let meta = derive_metadata(&[legacy, both]);
        assert_eq!(meta.zones, vec!["z1", "z2"]);
        assert_eq!(meta.region.as_deref(), Some("r1"));
    }

    #[test]
    fn unlabelled_nodes_yield_empty_metadata() {
        let meta = derive_metadata(&[NodeLabels::new(), node("", " ")]);
        assert_eq!(meta, ClusterMetadata::default());
    }

    #[tokio::test]
    async fn refresh_lists_nodes() {
        let client = ScriptedClient::new();
        client.set_nodes("east", Ok(vec![node("e1", "east"), node("e2", "east")]));
        let sync = MetadataSync::new(Arc::new(client), Duration::from_secs(1));

        let meta = sync.refresh(&target()).await.unwrap();
        assert_eq!(meta.zones, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn refresh_failure_is_soft_error() {
        let client = ScriptedClient::new();
        client.set_nodes("east", Err(CallError::Status(403)));
        let sync = MetadataSync::new(Arc::new(client), Duration::from_secs(1));

        let err = sync.refresh(&target()).await.unwrap_err();
        assert!(matches!(err, HealthError::MetadataQueryFailed(_)));
    }
}
