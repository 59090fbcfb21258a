//! StateStore: redb-backed persistence for the cluster registry.
//!
//! Provides typed CRUD operations over cluster registrations and credential
//! secrets. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(SECRETS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or replace a cluster registration.
    pub fn put_cluster(&self, cluster: &ClusterRegistration) -> StateResult<()> {
        let value = serde_json::to_vec(cluster).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            table
                .insert(cluster.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %cluster.name, "cluster registration stored");
        Ok(())
    }

    /// Store a new registration unless one with the same name exists.
    /// Returns `false` (and writes nothing) on a duplicate.
    pub fn create_cluster(&self, cluster: &ClusterRegistration) -> StateResult<bool> {
        let value = serde_json::to_vec(cluster).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let exists = table
                .get(cluster.name.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if exists {
                created = false;
            } else {
                table
                    .insert(cluster.name.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                created = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if created {
            debug!(cluster = %cluster.name, "cluster registration created");
        }
        Ok(created)
    }

    /// Get a cluster registration by name.
    pub fn get_cluster(&self, name: &str) -> StateResult<Option<ClusterRegistration>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let cluster: ClusterRegistration =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(cluster))
            }
            None => Ok(None),
        }
    }

    /// List all cluster registrations, ordered by name.
    pub fn list_clusters(&self) -> StateResult<Vec<ClusterRegistration>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let cluster: ClusterRegistration =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(cluster);
        }
        Ok(results)
    }

    /// Delete a cluster registration. Returns true if it existed.
    pub fn delete_cluster(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %name, existed, "cluster registration deleted");
        Ok(existed)
    }

    /// Replace the status subtree of a registration.
    ///
    /// The read of the current record and the write of the new one happen
    /// inside one write transaction, so a concurrent spec update is never
    /// lost and readers never observe a half-written status. Returns
    /// `false` without writing if the cluster has been deregistered.
    pub fn update_cluster_status(&self, name: &str, status: &ClusterStatus) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let current: Option<ClusterRegistration> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match current {
                Some(mut cluster) => {
                    cluster.status = status.clone();
                    let value = serde_json::to_vec(&cluster).map_err(map_err!(Serialize))?;
                    table
                        .insert(name, value.as_slice())
                        .map_err(map_err!(Write))?;
                    updated = true;
                }
                None => updated = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Secrets ────────────────────────────────────────────────────

    /// Insert or replace a credential secret.
    pub fn put_secret(&self, secret: &ClusterSecret) -> StateResult<()> {
        let key = secret.table_key();
        let value = serde_json::to_vec(secret).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SECRETS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "secret stored");
        Ok(())
    }

    /// Get a secret by namespace and name.
    pub fn get_secret(&self, namespace: &str, name: &str) -> StateResult<Option<ClusterSecret>> {
        let key = secret_key(namespace, name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SECRETS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let secret: ClusterSecret =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(secret))
            }
            None => Ok(None),
        }
    }

    /// Delete a secret. Returns true if it existed.
    pub fn delete_secret(&self, namespace: &str, name: &str) -> StateResult<bool> {
        let key = secret_key(namespace, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SECRETS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_cluster(name: &str) -> ClusterRegistration {
        ClusterRegistration {
            name: name.to_string(),
            spec: ClusterSpec {
                api_endpoint: format!("https://{name}.example.com:6443"),
                ca_bundle: None,
                secret_ref: SecretRef {
                    name: name.to_string(),
                },
            },
            status: ClusterStatus::default(),
            created_at: 1000,
        }
    }

    fn ready_status(probe: u64) -> ClusterStatus {
        ClusterStatus {
            conditions: vec![ClusterCondition {
                type_: ConditionType::Ready,
                status: ConditionStatus::True,
                last_probe_time: probe,
                last_transition_time: probe,
                reason: "ClusterReady".to_string(),
                message: "ok".to_string(),
            }],
            zones: vec!["us-east1-a".to_string(), "us-east1-b".to_string()],
            region: "us-east1".to_string(),
        }
    }

    fn test_secret(name: &str, token: &str) -> ClusterSecret {
        let mut data = BTreeMap::new();
        data.insert(TOKEN_KEY.to_string(), token.to_string());
        ClusterSecret {
            namespace: "kube-federation-system".to_string(),
            name: name.to_string(),
            data,
        }
    }

    // ── Cluster CRUD ───────────────────────────────────────────────

    #[test]
    fn cluster_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = test_cluster("east");

        store.put_cluster(&cluster).unwrap();
        let retrieved = store.get_cluster("east").unwrap();

        assert_eq!(retrieved, Some(cluster));
    }

    #[test]
    fn create_cluster_refuses_duplicates() {
        let store = StateStore::open_in_memory().unwrap();
        let first = test_cluster("east");
        assert!(store.create_cluster(&first).unwrap());

        let mut second = test_cluster("east");
        second.spec.api_endpoint = "https://other.example.com:6443".to_string();
        assert!(!store.create_cluster(&second).unwrap());

        let stored = store.get_cluster("east").unwrap().unwrap();
        assert_eq!(stored.spec.api_endpoint, first.spec.api_endpoint);
    }

    #[test]
    fn cluster_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_cluster("nope").unwrap().is_none());
    }

    #[test]
    fn cluster_list_is_ordered_by_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&test_cluster("west")).unwrap();
        store.put_cluster(&test_cluster("east")).unwrap();
        store.put_cluster(&test_cluster("central")).unwrap();

        let names: Vec<String> = store
            .list_clusters()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["central", "east", "west"]);
    }

    #[test]
    fn cluster_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&test_cluster("east")).unwrap();

        assert!(store.delete_cluster("east").unwrap());
        assert!(!store.delete_cluster("east").unwrap());
        assert!(store.get_cluster("east").unwrap().is_none());
    }

    // ── Status writes ──────────────────────────────────────────────

    #[test]
    fn status_update_replaces_only_status() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&test_cluster("east")).unwrap();

        assert!(store.update_cluster_status("east", &ready_status(50)).unwrap());

        let cluster = store.get_cluster("east").unwrap().unwrap();
        assert_eq!(cluster.status, ready_status(50));
        assert_eq!(cluster.spec, test_cluster("east").spec);
        assert_eq!(cluster.created_at, 1000);
    }

    #[test]
    fn status_update_preserves_concurrent_spec_change() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&test_cluster("east")).unwrap();

        // Operator rotates the endpoint between the reconciler's read and write.
        let mut changed = test_cluster("east");
        changed.spec.api_endpoint = "https://10.9.9.9:6443".to_string();
        store.put_cluster(&changed).unwrap();

        store.update_cluster_status("east", &ready_status(60)).unwrap();
        let cluster = store.get_cluster("east").unwrap().unwrap();
        assert_eq!(cluster.spec.api_endpoint, "https://10.9.9.9:6443");
        assert_eq!(cluster.status.ready_status(), ConditionStatus::True);
    }

    #[test]
    fn status_update_for_deregistered_cluster_is_discarded() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.update_cluster_status("gone", &ready_status(1)).unwrap());
        assert!(store.get_cluster("gone").unwrap().is_none());
    }

    // ── Secrets ────────────────────────────────────────────────────

    #[test]
    fn secret_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let secret = test_secret("east", "s3cr3t");

        store.put_secret(&secret).unwrap();
        assert_eq!(
            store.get_secret("kube-federation-system", "east").unwrap(),
            Some(secret)
        );
        // Namespaces partition the key space.
        assert!(store.get_secret("other", "east").unwrap().is_none());

        assert!(store.delete_secret("kube-federation-system", "east").unwrap());
        assert!(store.get_secret("kube-federation-system", "east").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("registry.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_cluster(&test_cluster("east")).unwrap();
            store.update_cluster_status("east", &ready_status(70)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let cluster = store.get_cluster("east").unwrap().unwrap();
        assert_eq!(cluster.status.region, "us-east1");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_clusters().unwrap().is_empty());
        assert!(!store.delete_cluster("nope").unwrap());
        assert!(!store.delete_secret("ns", "nope").unwrap());
    }
}
