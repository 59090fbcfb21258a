//! redb table definitions for the cluster registry.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Cluster registrations keyed by cluster name.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Credential secrets keyed by `{namespace}/{name}`.
pub const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");
