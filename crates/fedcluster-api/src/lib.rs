//! fedcluster-api: operator REST API for the federation cluster registry.
//!
//! Registering a cluster stores it and starts its reconciliation worker;
//! deregistering cancels the worker before the record is removed.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/clusters` | List registered clusters with status |
//! | POST | `/api/v1/clusters` | Register a cluster |
//! | GET | `/api/v1/clusters/{name}` | Get one cluster |
//! | DELETE | `/api/v1/clusters/{name}` | Deregister a cluster |
//! | PUT | `/api/v1/secrets/{name}` | Store a cluster token in the control-plane namespace |
//! | GET | `/healthz` | Liveness of the controller itself |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, put};
use fedcluster_health::ClusterReconciler;
use fedcluster_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub reconciler: Arc<ClusterReconciler>,
}

impl ApiState {
    /// Namespace cluster secrets are written to and read from.
    pub fn namespace(&self) -> &str {
        &self.reconciler.config().control_plane_namespace
    }
}

/// Build the complete API router.
pub fn build_router(store: StateStore, reconciler: Arc<ClusterReconciler>) -> Router {
    let api_state = ApiState { store, reconciler };

    let api_routes = Router::new()
        .route("/clusters", get(handlers::list_clusters).post(handlers::register_cluster))
        .route(
            "/clusters/{name}",
            get(handlers::get_cluster).delete(handlers::deregister_cluster),
        )
        .route("/secrets/{name}", put(handlers::put_secret))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(api_state))
}
