//! Controller mode: runs the cluster reconciler and the REST API.
//!
//! In this mode, the daemon:
//! 1. Opens the cluster registry
//! 2. Starts the reconciler, which keeps one worker per in-scope cluster
//! 3. Serves the operator REST API
//! 4. On shutdown, stops the API and cancels every worker

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use fedcluster_health::{ClusterReconciler, HttpClusterClient};
use fedcluster_state::StateStore;

use crate::config::DaemonConfig;

/// Run the controller until Ctrl-C.
pub async fn run_controller(config: DaemonConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    serve(config, listener, async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => {
                error!(error = %e, "failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
        }
    })
    .await
}

/// Run the controller on `listener` until `shutdown` resolves.
pub async fn serve<F>(config: DaemonConfig, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.controller.validate()?;
    info!("federation cluster controller starting");

    // ── Cluster registry ───────────────────────────────────────────
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "cluster registry opened");

    // ── Reconciler ────────────────────────────────────────────────
    let reconciler = Arc::new(ClusterReconciler::new(
        state.clone(),
        Arc::new(HttpClusterClient::new()),
        config.controller.clone(),
    ));
    if !config.controller.clusters.is_empty() {
        info!(clusters = ?config.controller.clusters, "reconciliation limited to listed clusters");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler_handle = tokio::spawn({
        let reconciler = Arc::clone(&reconciler);
        async move { reconciler.run(shutdown_rx).await }
    });

    // ── REST API server ────────────────────────────────────────────
    let router = fedcluster_api::build_router(state, reconciler);
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown.await;
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Workers are cancelled by the reconciler on its way out.
    let _ = reconciler_handle.await;

    info!("federation cluster controller stopped");
    Ok(())
}
