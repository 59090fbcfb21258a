//! Cluster reconciler: one background worker per registered cluster.
//!
//! Every worker runs its own timeline: on each tick it resolves the
//! cluster's credentials, probes the API endpoint, feeds the outcome to
//! its condition state machine, refreshes zones/region while the cluster
//! is ready, and writes the merged status back in one store transaction.
//! A fault in one worker is logged and never reaches another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use fedcluster_state::StateStore;

use crate::client::{ClusterClient, ProbeTarget};
use crate::condition::{ClusterHealth, ConditionStateMachine, Observation};
use crate::config::ReconcilerConfig;
use crate::credentials::{CredentialResolver, CredentialStore};
use crate::error::HealthResult;
use crate::metadata::MetadataSync;
use crate::probe::EndpointProbe;

/// What a single reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    /// Status was written.
    Reconciled {
        health: ClusterHealth,
        status_changed: bool,
        metadata_refreshed: bool,
    },
    /// The registration is gone; nothing was written.
    Deregistered,
}

/// Reconciliation pipeline for a single cluster.
pub struct ClusterWorker {
    name: String,
    state: StateStore,
    resolver: CredentialResolver,
    probe: EndpointProbe,
    metadata: MetadataSync,
    failure_threshold: u32,
    success_threshold: u32,
    /// Resumed from the stored condition on the first pass.
    machine: Option<ConditionStateMachine>,
}

impl ClusterWorker {
    pub fn new(
        name: impl Into<String>,
        state: StateStore,
        resolver: CredentialResolver,
        probe: EndpointProbe,
        metadata: MetadataSync,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            state,
            resolver,
            probe,
            metadata,
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            machine: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one pass: resolve → probe → observe → maybe sync metadata →
    /// persist. Errors returned here are store faults only; everything
    /// that goes wrong talking to the cluster ends up in the condition.
    pub async fn run_pass(&mut self) -> HealthResult<PassResult> {
        let Some(registration) = self.state.get_cluster(&self.name)? else {
            return Ok(PassResult::Deregistered);
        };

        let (observation, reachable) = match self.resolver.resolve(&registration.spec.secret_ref.name) {
            Ok(token) => {
                let target = ProbeTarget::new(&registration.spec, token);
                let outcome = self.probe.probe(&target).await;
                let reachable = outcome.is_success().then_some(target);
                (Observation::from(&outcome), reachable)
            }
            Err(e) if e.is_credential() => {
                warn!(cluster = %self.name, error = %e, "credential resolution failed");
                (Observation::credential_failure(&e), None)
            }
            Err(e) => return Err(e),
        };

        let (failure_threshold, success_threshold) = (self.failure_threshold, self.success_threshold);
        let machine = self.machine.get_or_insert_with(|| {
            ConditionStateMachine::resume(
                &registration.status.conditions,
                failure_threshold,
                success_threshold,
            )
        });

        let mut status = registration.status.clone();
        let transition = machine.observe(&mut status.conditions, &observation, epoch_millis());

        // Zones and region stay as last known unless the cluster is ready
        // and answered in this very pass.
        let mut metadata_refreshed = false;
        if let Some(target) = reachable.filter(|_| machine.is_ready()) {
            match self.metadata.refresh(&target).await {
                Ok(meta) => {
                    status.zones = meta.zones;
                    status.region = meta.region.unwrap_or_default();
                    metadata_refreshed = true;
                }
                Err(e) => warn!(cluster = %self.name, error = %e, "keeping previous zones and region"),
            }
        }

        if !self.state.update_cluster_status(&self.name, &status)? {
            debug!(cluster = %self.name, "registration removed during pass, result discarded");
            return Ok(PassResult::Deregistered);
        }

        Ok(PassResult::Reconciled {
            health: transition.to,
            status_changed: transition.status_changed,
            metadata_refreshed,
        })
    }
}

/// Per-cluster worker handle.
struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerSlot {
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }

    /// Stop and wait until the task has fully exited.
    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// Workers started and stopped by one registry scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

/// Owns the worker of every in-scope cluster.
pub struct ClusterReconciler {
    state: StateStore,
    config: ReconcilerConfig,
    resolver: CredentialResolver,
    probe: EndpointProbe,
    metadata: MetadataSync,
    /// Active workers: cluster name → slot.
    workers: Arc<RwLock<HashMap<String, WorkerSlot>>>,
}

impl ClusterReconciler {
    /// Build a reconciler reading credentials from `state`.
    pub fn new(state: StateStore, client: Arc<dyn ClusterClient>, config: ReconcilerConfig) -> Self {
        let credentials: Arc<dyn CredentialStore> = Arc::new(state.clone());
        Self::with_credentials(state, credentials, client, config)
    }

    /// Build a reconciler with a separate credential source.
    pub fn with_credentials(
        state: StateStore,
        credentials: Arc<dyn CredentialStore>,
        client: Arc<dyn ClusterClient>,
        config: ReconcilerConfig,
    ) -> Self {
        let resolver = CredentialResolver::new(credentials, config.control_plane_namespace.clone());
        let probe = EndpointProbe::new(client.clone(), config.single_call_timeout);
        let metadata = MetadataSync::new(client, config.single_call_timeout);
        Self {
            state,
            config,
            resolver,
            probe,
            metadata,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Start (or restart) the worker for `name`. A previous worker has
    /// exited before the new one is spawned.
    pub async fn start_worker(&self, name: &str) {
        let mut workers = self.workers.write().await;
        if let Some(old) = workers.remove(name) {
            old.shutdown().await;
            debug!(cluster = %name, "previous cluster worker stopped");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = ClusterWorker::new(
            name,
            self.state.clone(),
            self.resolver.clone(),
            self.probe.clone(),
            self.metadata.clone(),
            &self.config,
        );
        let interval = self.config.probe_interval;
        let handle = tokio::spawn(run_worker(worker, interval, shutdown_rx));
        workers.insert(name.to_string(), WorkerSlot { handle, shutdown_tx });

        info!(cluster = %name, interval = ?interval, "cluster worker started");
    }

    /// Stop the worker for `name`, cancelling any in-flight pass.
    pub async fn stop_worker(&self, name: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.remove(name) {
            Some(slot) => {
                slot.stop();
                info!(cluster = %name, "cluster worker stopped");
                true
            }
            None => false,
        }
    }

    /// Stop reconciling `name` and remove its registration.
    ///
    /// A pass that was already past its last await may still finish, but
    /// its status write is dropped once the registration is gone.
    pub async fn deregister(&self, name: &str) -> HealthResult<bool> {
        self.stop_worker(name).await;
        let removed = self.state.delete_cluster(name)?;
        if removed {
            info!(cluster = %name, "cluster deregistered");
        }
        Ok(removed)
    }

    /// Bring the worker set in line with the registry: start workers for
    /// in-scope clusters without a live one, stop the rest.
    pub async fn sync_registrations(&self) -> HealthResult<SyncReport> {
        let wanted: HashSet<String> = self
            .state
            .list_clusters()?
            .into_iter()
            .map(|c| c.name)
            .filter(|name| self.config.in_scope(name))
            .collect();

        let mut report = SyncReport::default();
        {
            let mut workers = self.workers.write().await;
            let stale: Vec<String> = workers
                .keys()
                .filter(|name| !wanted.contains(*name))
                .cloned()
                .collect();
            for name in stale {
                if let Some(slot) = workers.remove(&name) {
                    slot.stop();
                    report.stopped.push(name);
                }
            }
        }

        for name in &wanted {
            let needs_start = {
                let workers = self.workers.read().await;
                match workers.get(name) {
                    Some(slot) if slot.handle.is_finished() => {
                        warn!(cluster = %name, "cluster worker exited, restarting");
                        true
                    }
                    Some(_) => false,
                    None => true,
                }
            };
            if needs_start {
                self.start_worker(name).await;
                report.started.push(name.clone());
            }
        }

        report.started.sort();
        report.stopped.sort();
        if !report.started.is_empty() || !report.stopped.is_empty() {
            debug!(started = ?report.started, stopped = ?report.stopped, "registrations synced");
        }
        Ok(report)
    }

    /// Rescan the registry every `resync_interval` until `shutdown` fires,
    /// then stop every worker.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            namespace = %self.config.control_plane_namespace,
            probe_interval = ?self.config.probe_interval,
            resync_interval = ?self.config.resync_interval,
            "cluster reconciler running"
        );

        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = resync.tick() => {
                    if let Err(e) = self.sync_registrations().await {
                        error!(error = %e, "failed to sync registrations");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.stop_all().await;
    }

    /// Stop all workers (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut workers = self.workers.write().await;
        for (name, slot) in workers.drain() {
            slot.stop();
            debug!(cluster = %name, "cluster worker stopped");
        }
        info!("all cluster workers stopped");
    }

    /// Names of clusters with a worker, sorted.
    pub async fn active_workers(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut names: Vec<String> = workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` has a worker.
    pub async fn is_reconciling(&self, name: &str) -> bool {
        let workers = self.workers.read().await;
        workers.contains_key(name)
    }
}

/// The tick loop for a single cluster. The first pass runs immediately.
async fn run_worker(mut worker: ClusterWorker, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(cluster = %worker.name(), "worker loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            result = worker.run_pass() => match result {
                Ok(PassResult::Deregistered) => {
                    info!(cluster = %worker.name(), "registration gone, worker exiting");
                    break;
                }
                Ok(PassResult::Reconciled { .. }) => {}
                Err(e) => error!(cluster = %worker.name(), error = %e, "reconciliation pass failed"),
            },
            _ = shutdown.changed() => {
                debug!(cluster = %worker.name(), "in-flight pass cancelled");
                break;
            }
        }
    }

    debug!(cluster = %worker.name(), "worker loop stopped");
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
